use thiserror::Error;

use crate::review::{DishId, OrderId, RestaurantId};

#[derive(Error, Debug)]
pub enum SavorError {
    #[error("dish {dish_id} was not ordered on check {order_id} at restaurant {restaurant_id}")]
    DishNotInOrder {
        dish_id: DishId,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    },

    #[error("rating {0} is outside the allowed range 1..=5")]
    RatingOutOfRange(i32),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("review already exists for dish {dish_id} on check {order_id}")]
    DuplicateReview { dish_id: DishId, order_id: OrderId },

    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("event decode error: {0}")]
    Decode(String),
}

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected input; retrying the same request will fail again.
    Validation,
    /// Duplicate submission under the reject policy.
    Conflict,
    /// Primary Store or Cache unreachable.
    Transient,
    /// Event Bus refused the message.
    Publish,
    /// Data read back from a collaborator was malformed.
    Internal,
}

impl SavorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SavorError::DishNotInOrder { .. }
            | SavorError::RatingOutOfRange(_)
            | SavorError::InvalidRequest(_) => ErrorKind::Validation,
            SavorError::DuplicateReview { .. } => ErrorKind::Conflict,
            SavorError::Store(_) | SavorError::Cache(_) => ErrorKind::Transient,
            SavorError::Publish(_) => ErrorKind::Publish,
            SavorError::Decode(_) => ErrorKind::Internal,
        }
    }

    pub fn is_user_correctable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Conflict)
    }

    /// HTTP-style status an outer surface would map this error to.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Transient | ErrorKind::Publish | ErrorKind::Internal => 500,
        }
    }
}

pub type Result<T, E = SavorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_user_correctable() {
        let err = SavorError::DishNotInOrder {
            dish_id: 1,
            order_id: 2,
            restaurant_id: 3,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.is_user_correctable());
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err.to_string(),
            "dish 1 was not ordered on check 2 at restaurant 3"
        );
    }

    #[test]
    fn test_duplicate_is_conflict() {
        let err = SavorError::DuplicateReview {
            dish_id: 7,
            order_id: 9,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_store_errors_are_transient() {
        let err = SavorError::Store("connection refused".into());
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(!err.is_user_correctable());
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_malformed_event_is_not_the_callers_fault() {
        let err = SavorError::Decode("missing field `dish_id`".into());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_user_correctable());
        assert_eq!(err.status_code(), 500);
    }
}
