//! Aggregation trigger carried on the Event Bus.
//!
//! Field names are part of the wire contract with other producers and
//! consumers: `{type, dish_id, restaurant_id, order_id, rating, timestamp}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SavorError;
use crate::review::{DishId, OrderId, RestaurantId, Review};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewReview,
    UpdatedReview,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewReview => "new_review",
            EventKind::UpdatedReview => "updated_review",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub dish_id: DishId,
    pub restaurant_id: RestaurantId,
    pub order_id: OrderId,
    pub rating: i32,
    pub timestamp: DateTime<Utc>,
}

impl AggregationEvent {
    pub fn for_review(kind: EventKind, review: &Review, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            dish_id: review.dish_id,
            restaurant_id: review.restaurant_id,
            order_id: review.order_id,
            rating: review.rating,
            timestamp,
        }
    }

    /// Partition key on the bus. All events for a dish share one partition.
    pub fn partition_key(&self) -> String {
        self.dish_id.to_string()
    }

    pub fn to_json(&self) -> Result<String, SavorError> {
        serde_json::to_string(self).map_err(|e| SavorError::Decode(e.to_string()))
    }

    pub fn from_json(body: &str) -> Result<Self, SavorError> {
        serde_json::from_str(body).map_err(|e| SavorError::Decode(e.to_string()))
    }
}
