use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DishId = i64;
pub type OrderId = i64;
pub type RestaurantId = i64;
pub type ReviewId = i64;

/// Lowest and highest accepted star rating.
pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

/// A persisted review. `(dish_id, order_id, restaurant_id)` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub dish_id: DishId,
    pub order_id: OrderId,
    pub restaurant_id: RestaurantId,
    pub rating: i32,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// A review as submitted, before it has a surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub dish_id: DishId,
    pub order_id: OrderId,
    pub restaurant_id: RestaurantId,
    pub rating: i32,
    #[serde(default)]
    pub comment: String,
}

impl NewReview {
    pub fn natural_key(&self) -> (DishId, OrderId, RestaurantId) {
        (self.dish_id, self.order_id, self.restaurant_id)
    }
}

/// Result of an atomic upsert on the natural key.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(Review),
    Updated(Review),
}

impl UpsertOutcome {
    pub fn review(&self) -> &Review {
        match self {
            UpsertOutcome::Inserted(r) | UpsertOutcome::Updated(r) => r,
        }
    }

    pub fn into_review(self) -> Review {
        match self {
            UpsertOutcome::Inserted(r) | UpsertOutcome::Updated(r) => r,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, UpsertOutcome::Updated(_))
    }
}

/// One item of a per-check batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub dish_id: DishId,
    pub rating: i32,
    #[serde(default)]
    pub comment: String,
}

/// All reviews a diner leaves for one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub check_id: OrderId,
    pub restaurant_id: RestaurantId,
    pub reviews: Vec<BatchItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub dish_id: DishId,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub processed: Vec<BatchItemResult>,
    pub created: usize,
    pub failed: usize,
}

impl BatchOutcome {
    /// 201 when at least one item went through, 400 otherwise.
    pub fn status_code(&self) -> u16 {
        if self.created > 0 {
            201
        } else {
            400
        }
    }
}
