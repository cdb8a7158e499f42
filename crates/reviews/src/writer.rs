use std::sync::Arc;

use tracing::{debug, info, warn};

use savor_core::config::{DuplicatePolicy, PipelineConfig};
use savor_core::{
    keys, AggregationEvent, BatchItemResult, BatchOutcome, BatchSubmission, Clock, DishId,
    EventKind, EventPublisher, ItemStatus, NewReview, RestaurantId, Review, ReviewStore,
    SavorError, StatCache, SystemClock, UpsertOutcome, MAX_RATING, MIN_RATING,
};

/// Records reviews in the Primary Store and triggers their aggregation.
///
/// A submission runs in two phases. The durable phase validates and upserts;
/// any failure there is returned to the caller. The best-effort phase
/// refreshes the dedup marker and publishes an [`AggregationEvent`]; failures
/// there are logged and never change the result, since the review is
/// already committed.
pub struct ReviewWriter {
    store: Arc<dyn ReviewStore>,
    cache: Arc<dyn StatCache>,
    publisher: Arc<dyn EventPublisher>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
}

impl ReviewWriter {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        cache: Arc<dyn StatCache>,
        publisher: Arc<dyn EventPublisher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate and upsert one review, then announce it.
    pub async fn submit(&self, review: NewReview) -> Result<Review, SavorError> {
        // ── Durable phase ─────────────────────────────────────
        if !(MIN_RATING..=MAX_RATING).contains(&review.rating) {
            return Err(SavorError::RatingOutOfRange(review.rating));
        }

        let (dish_id, order_id, restaurant_id) = review.natural_key();
        if !self
            .store
            .dish_in_order(dish_id, order_id, restaurant_id)
            .await?
        {
            return Err(SavorError::DishNotInOrder {
                dish_id,
                order_id,
                restaurant_id,
            });
        }

        let marker = keys::review_marker(dish_id, order_id);
        if self.config.duplicate_policy == DuplicatePolicy::Reject
            && self.marker_present(&marker).await
        {
            return Err(SavorError::DuplicateReview { dish_id, order_id });
        }

        let outcome = self.store.upsert_review(&review).await?;
        info!(
            review_id = outcome.review().id,
            dish_id,
            order_id,
            restaurant_id,
            rating = review.rating,
            updated = outcome.is_update(),
            "review recorded"
        );

        // ── Best-effort phase ─────────────────────────────────
        self.refresh_marker(&marker).await;
        self.announce(&outcome).await;

        Ok(outcome.into_review())
    }

    /// Submit every review of one check independently.
    ///
    /// Only a malformed envelope fails the whole call; per-item failures are
    /// reported in the outcome and never stop the remaining items.
    pub async fn submit_batch(&self, batch: BatchSubmission) -> Result<BatchOutcome, SavorError> {
        if batch.check_id <= 0 || batch.restaurant_id <= 0 {
            return Err(SavorError::InvalidRequest(
                "check_id and restaurant_id are required".into(),
            ));
        }
        if batch.reviews.is_empty() {
            return Err(SavorError::InvalidRequest(
                "at least one review is required".into(),
            ));
        }

        let mut processed = Vec::with_capacity(batch.reviews.len());
        let mut created = 0;
        let mut failed = 0;

        for item in batch.reviews {
            let dish_id = item.dish_id;
            let result = self
                .submit(NewReview {
                    dish_id,
                    order_id: batch.check_id,
                    restaurant_id: batch.restaurant_id,
                    rating: item.rating,
                    comment: item.comment,
                })
                .await;

            match result {
                Ok(_) => {
                    created += 1;
                    processed.push(BatchItemResult {
                        dish_id,
                        status: ItemStatus::Ok,
                        message: None,
                    });
                }
                Err(e) => {
                    failed += 1;
                    warn!(dish_id, check_id = batch.check_id, error = %e, "batch item rejected");
                    processed.push(BatchItemResult {
                        dish_id,
                        status: ItemStatus::Error,
                        message: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            check_id = batch.check_id,
            restaurant_id = batch.restaurant_id,
            created,
            failed,
            "batch submission finished"
        );
        Ok(BatchOutcome {
            processed,
            created,
            failed,
        })
    }

    /// Reviews of one dish, newest first.
    pub async fn list_dish_reviews(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<Vec<Review>, SavorError> {
        self.store.list_dish_reviews(dish_id, restaurant_id).await
    }

    /// A marker that cannot be read counts as absent.
    async fn marker_present(&self, key: &str) -> bool {
        match self.cache.marker_exists(key).await {
            Ok(present) => present,
            Err(e) => {
                warn!(key, error = %e, "dedup marker lookup failed, treating as absent");
                false
            }
        }
    }

    async fn refresh_marker(&self, key: &str) {
        if let Err(e) = self
            .cache
            .set_marker(key, self.config.dedup_marker_ttl())
            .await
        {
            warn!(key, error = %e, "failed to refresh dedup marker");
        }
    }

    async fn announce(&self, outcome: &UpsertOutcome) {
        let kind = if outcome.is_update() {
            EventKind::UpdatedReview
        } else {
            EventKind::NewReview
        };
        let event = AggregationEvent::for_review(kind, outcome.review(), self.clock.now());

        match self.publisher.publish(&event).await {
            Ok(()) => debug!(dish_id = event.dish_id, kind = %kind, "aggregation event published"),
            Err(e) => warn!(
                dish_id = event.dish_id,
                kind = %kind,
                error = %e,
                "failed to publish aggregation event, aggregation will lag"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use savor_core::FixedClock;
    use savor_queue::MemoryBus;
    use savor_storage::{MemoryReviewStore, MemoryStatCache};

    struct Fixture {
        store: Arc<MemoryReviewStore>,
        cache: Arc<MemoryStatCache>,
        bus: Arc<MemoryBus>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryReviewStore::new());
            store.add_dish(1, 100, "Ramen");
            store.add_dish(2, 100, "Gyoza");
            store.add_order(10, 100, Utc::now(), &[1, 2]);
            Self {
                store,
                cache: Arc::new(MemoryStatCache::new()),
                bus: Arc::new(MemoryBus::new()),
            }
        }

        fn writer(&self, policy: DuplicatePolicy) -> ReviewWriter {
            let config = PipelineConfig {
                duplicate_policy: policy,
                ..PipelineConfig::default()
            };
            ReviewWriter::new(
                self.store.clone(),
                self.cache.clone(),
                self.bus.clone(),
                config,
            )
        }
    }

    fn review(dish_id: DishId, rating: i32) -> NewReview {
        NewReview {
            dish_id,
            order_id: 10,
            restaurant_id: 100,
            rating,
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn test_rating_bounds() {
        let fx = Fixture::new();
        let writer = fx.writer(DuplicatePolicy::Upsert);

        for rating in [0, 6] {
            let err = writer.submit(review(1, rating)).await.unwrap_err();
            assert!(matches!(err, SavorError::RatingOutOfRange(r) if r == rating));
        }
        assert!(fx.store.reviews().is_empty());

        for rating in [1, 5] {
            assert_eq!(writer.submit(review(1, rating)).await.unwrap().rating, rating);
        }
    }

    #[tokio::test]
    async fn test_dish_not_in_order() {
        let fx = Fixture::new();
        let writer = fx.writer(DuplicatePolicy::Upsert);

        let mut wrong_restaurant = review(1, 4);
        wrong_restaurant.restaurant_id = 200;
        let err = writer.submit(wrong_restaurant).await.unwrap_err();
        assert!(matches!(err, SavorError::DishNotInOrder { .. }));
        assert!(err.is_user_correctable());

        let err = writer.submit(review(3, 4)).await.unwrap_err();
        assert!(matches!(err, SavorError::DishNotInOrder { dish_id: 3, .. }));
        assert!(fx.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_resubmission_updates_in_place() {
        let fx = Fixture::new();
        let writer = fx.writer(DuplicatePolicy::Upsert);

        let first = writer.submit(review(1, 2)).await.unwrap();
        let second = writer.submit(review(1, 5)).await.unwrap();

        assert_eq!(first.id, second.id);
        let rows = fx.store.reviews();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rating, 5);

        let kinds: Vec<_> = fx.bus.published().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::NewReview, EventKind::UpdatedReview]);
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_marked_review() {
        let fx = Fixture::new();
        let writer = fx.writer(DuplicatePolicy::Reject);

        writer.submit(review(1, 3)).await.unwrap();
        let err = writer.submit(review(1, 4)).await.unwrap_err();

        assert!(matches!(err, SavorError::DuplicateReview { dish_id: 1, order_id: 10 }));
        assert_eq!(err.status_code(), 409);
        assert_eq!(fx.store.reviews()[0].rating, 3);
    }

    #[tokio::test]
    async fn test_reject_policy_treats_unreadable_marker_as_absent() {
        let fx = Fixture::new();
        let writer = fx.writer(DuplicatePolicy::Reject);

        writer.submit(review(1, 3)).await.unwrap();
        fx.cache.set_fail_reads(true);
        assert_eq!(writer.submit(review(1, 4)).await.unwrap().rating, 4);
    }

    #[tokio::test]
    async fn test_marker_refreshed_with_ttl() {
        let fx = Fixture::new();
        let writer = fx.writer(DuplicatePolicy::Upsert);

        writer.submit(review(1, 3)).await.unwrap();
        let marker = keys::review_marker(1, 10);
        assert!(fx.cache.marker_exists(&marker).await.unwrap());
        assert_eq!(
            fx.cache.ttl(&marker),
            Some(PipelineConfig::default().dedup_marker_ttl())
        );
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let fx = Fixture::new();
        fx.bus.set_fail_publish(true);
        fx.cache.set_fail_writes(true);
        let writer = fx.writer(DuplicatePolicy::Upsert);

        let stored = writer.submit(review(1, 4)).await.unwrap();
        assert_eq!(stored.rating, 4);
        assert_eq!(fx.store.reviews().len(), 1);
        assert!(fx.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_surfaces() {
        let fx = Fixture::new();
        fx.store.set_failing(true);
        let writer = fx.writer(DuplicatePolicy::Upsert);

        let err = writer.submit(review(1, 4)).await.unwrap_err();
        assert!(matches!(err, SavorError::Store(_)));
        assert!(fx.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_event_carries_review_fields() {
        let fx = Fixture::new();
        let now = Utc.with_ymd_and_hms(2025, 6, 14, 12, 0, 0).unwrap();
        let writer = fx
            .writer(DuplicatePolicy::Upsert)
            .with_clock(Arc::new(FixedClock(now)));

        writer.submit(review(2, 5)).await.unwrap();
        let events = fx.bus.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].dish_id, 2);
        assert_eq!(events[0].restaurant_id, 100);
        assert_eq!(events[0].order_id, 10);
        assert_eq!(events[0].rating, 5);
        assert_eq!(events[0].timestamp, now);
    }
}
