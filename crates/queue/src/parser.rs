//! Decode bus message bodies into [`AggregationEvent`]s.

use savor_core::AggregationEvent;

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Parse a single message body.
///
/// Rejects bodies that are not valid JSON, miss a required field, or carry a
/// `type` other than `new_review` / `updated_review`.
pub fn parse_message(msg: &QueueMessage) -> Result<AggregationEvent, QueueError> {
    serde_json::from_str(&msg.body)
        .map_err(|e| QueueError::Parse(format!("Invalid event in message {}: {}", msg.id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use savor_core::EventKind;

    fn make_msg(id: &str, body: &str) -> QueueMessage {
        QueueMessage {
            id: id.to_string(),
            key: "1".to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            attempt_count: 1,
        }
    }

    #[test]
    fn test_parse_new_review() {
        let body = r#"{
            "type": "new_review",
            "dish_id": 12,
            "restaurant_id": 3,
            "order_id": 77,
            "rating": 5,
            "timestamp": "2025-06-14T12:00:00Z"
        }"#;
        let event = parse_message(&make_msg("1-0", body)).unwrap();

        assert_eq!(event.kind, EventKind::NewReview);
        assert_eq!(event.dish_id, 12);
        assert_eq!(event.restaurant_id, 3);
        assert_eq!(event.order_id, 77);
        assert_eq!(event.rating, 5);
    }

    #[test]
    fn test_parse_updated_review() {
        let body = r#"{"type":"updated_review","dish_id":1,"restaurant_id":1,"order_id":1,"rating":2,"timestamp":"2025-06-14T12:00:00Z"}"#;
        let event = parse_message(&make_msg("2-0", body)).unwrap();
        assert_eq!(event.kind, EventKind::UpdatedReview);
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = parse_message(&make_msg("bad", "not json at all")).unwrap_err();
        assert!(matches!(err, QueueError::Parse(_)));
        assert!(err.to_string().contains("Invalid event in message bad"));
    }

    #[test]
    fn test_parse_missing_field() {
        let body = r#"{"type":"new_review","dish_id":1}"#;
        assert!(parse_message(&make_msg("short", body)).is_err());
    }
}
