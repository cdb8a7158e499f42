use std::sync::Arc;

use tracing::{debug, info, warn};

use savor_core::config::PipelineConfig;
use savor_core::{
    keys, AggregationEvent, CachedDishStat, Clock, DishAggregate, ReviewStore, StatCache,
    SystemClock,
};

/// What one event changed. Each step succeeds or fails on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    /// The stored aggregate was rewritten from the review rows.
    pub recomputed: bool,
    /// Aggregate read back after recomputation.
    pub aggregate: Option<DishAggregate>,
    /// The cached dish stat was refreshed.
    pub mirrored: bool,
    /// New daily popularity score, when the increment landed.
    pub popularity: Option<f64>,
    /// The all-time board was overwritten.
    pub ranked: bool,
}

impl ProcessReport {
    pub fn is_complete(&self) -> bool {
        self.recomputed && self.mirrored && self.popularity.is_some() && self.ranked
    }
}

/// Sole writer of dish aggregates, the cache mirror and both leaderboards.
///
/// Events must be fed in delivery order from one logical stream; nothing
/// here locks, so running two consumers over the same dishes races.
pub struct AggregationConsumer {
    store: Arc<dyn ReviewStore>,
    cache: Arc<dyn StatCache>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
}

impl AggregationConsumer {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        cache: Arc<dyn StatCache>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Apply one event.
    ///
    /// The stored aggregate and the all-time score are recomputed from
    /// scratch, so replays leave them unchanged. The daily popularity
    /// increment is not: every delivery of the same event adds one.
    pub async fn process(&self, event: &AggregationEvent) -> ProcessReport {
        let dish_id = event.dish_id;
        let restaurant_id = event.restaurant_id;
        let now = self.clock.now();
        let mut report = ProcessReport::default();

        match self
            .store
            .recompute_dish_aggregate(dish_id, restaurant_id)
            .await
        {
            Ok(true) => report.recomputed = true,
            Ok(false) => warn!(dish_id, restaurant_id, "no dish row to recompute"),
            Err(e) => warn!(dish_id, restaurant_id, error = %e, "aggregate recomputation failed"),
        }

        report.aggregate = match self.store.dish_aggregate(dish_id, restaurant_id).await {
            Ok(aggregate) => aggregate,
            Err(e) => {
                warn!(dish_id, restaurant_id, error = %e, "aggregate re-read failed");
                None
            }
        };

        if let Some(aggregate) = &report.aggregate {
            let stat = CachedDishStat {
                avg_rating: aggregate.avg_rating,
                review_count: aggregate.review_count,
                last_updated: now.timestamp(),
            };
            let key = keys::dish_stat(restaurant_id, dish_id);
            match self
                .cache
                .put_dish_stat(&key, &stat, self.config.dish_stat_ttl())
                .await
            {
                Ok(()) => report.mirrored = true,
                Err(e) => warn!(key = %key, error = %e, "dish stat mirror failed"),
            }
        }

        let daily = keys::daily_popularity(self.clock.today(), restaurant_id);
        match self
            .cache
            .incr_score(
                &daily,
                dish_id,
                1.0,
                Some(self.config.daily_popularity_ttl()),
            )
            .await
        {
            Ok(score) => report.popularity = Some(score),
            Err(e) => warn!(key = %daily, dish_id, error = %e, "daily popularity increment failed"),
        }

        if let Some(aggregate) = &report.aggregate {
            let board = keys::all_time(restaurant_id);
            match self
                .cache
                .set_score(&board, dish_id, aggregate.avg_rating)
                .await
            {
                Ok(()) => report.ranked = true,
                Err(e) => warn!(key = %board, dish_id, error = %e, "all-time leaderboard update failed"),
            }
        }

        if report.is_complete() {
            debug!(dish_id, restaurant_id, kind = %event.kind, "event aggregated");
        } else {
            info!(
                dish_id,
                restaurant_id,
                kind = %event.kind,
                recomputed = report.recomputed,
                mirrored = report.mirrored,
                ranked = report.ranked,
                "event partially aggregated"
            );
        }
        report
    }
}
