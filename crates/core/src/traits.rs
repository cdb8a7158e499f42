use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::SavorError;
use crate::event::AggregationEvent;
use crate::review::{DishId, NewReview, OrderId, RestaurantId, Review, UpsertOutcome};
use crate::stats::{CachedDishStat, DishAggregate, DishMeta, DishRanking, ScoredDish};

/// The Primary Store: authoritative reviews and per-dish aggregates.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Whether `dish_id` was an item of `order_id` placed at `restaurant_id`.
    async fn dish_in_order(
        &self,
        dish_id: DishId,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<bool, SavorError>;

    /// Insert or update by natural key as one atomic step. Concurrent calls
    /// for the same key must never both insert.
    async fn upsert_review(&self, review: &NewReview) -> Result<UpsertOutcome, SavorError>;

    /// Reviews of one dish, newest first.
    async fn list_dish_reviews(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<Vec<Review>, SavorError>;

    /// Recompute avg/count from every review row of the dish and write them
    /// back. Returns `false` when no dish row matched.
    async fn recompute_dish_aggregate(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<bool, SavorError>;

    async fn dish_aggregate(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<DishAggregate>, SavorError>;

    async fn dish_meta(&self, dish_id: DishId) -> Result<Option<DishMeta>, SavorError>;

    /// Dishes ranked by order-item count for orders placed on `date`.
    async fn most_ordered_on(
        &self,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<DishRanking>, SavorError>;

    /// Dishes with `avg_rating > 0`, best first.
    async fn best_rated(&self, limit: usize) -> Result<Vec<DishRanking>, SavorError>;

    /// `(rating, count)` rows, optionally scoped to one restaurant.
    async fn rating_counts(
        &self,
        restaurant_id: Option<RestaurantId>,
    ) -> Result<Vec<(i32, i64)>, SavorError>;
}

/// The Cache Mirror: TTL'd hashes, sorted sets and existence markers.
///
/// Keys come from [`crate::keys`]; implementations only store them.
#[async_trait]
pub trait StatCache: Send + Sync {
    async fn put_dish_stat(
        &self,
        key: &str,
        stat: &CachedDishStat,
        ttl: Duration,
    ) -> Result<(), SavorError>;

    async fn dish_stat(&self, key: &str) -> Result<Option<CachedDishStat>, SavorError>;

    /// Add `delta` to a member's score, refreshing the key's TTL when given.
    /// Returns the new score.
    async fn incr_score(
        &self,
        key: &str,
        dish_id: DishId,
        delta: f64,
        ttl: Option<Duration>,
    ) -> Result<f64, SavorError>;

    /// Overwrite a member's score.
    async fn set_score(&self, key: &str, dish_id: DishId, score: f64) -> Result<(), SavorError>;

    /// Highest `count` members, descending by score.
    async fn top_scores(&self, key: &str, count: usize) -> Result<Vec<ScoredDish>, SavorError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SavorError>;

    async fn set_marker(&self, key: &str, ttl: Duration) -> Result<(), SavorError>;

    async fn marker_exists(&self, key: &str) -> Result<bool, SavorError>;
}

/// Producer side of the Event Bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &AggregationEvent) -> Result<(), SavorError>;
}

/// Blanket implementation so `Arc<dyn EventPublisher>` can be used directly.
#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, event: &AggregationEvent) -> Result<(), SavorError> {
        (**self).publish(event).await
    }
}
