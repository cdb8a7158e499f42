use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use savor_core::config::PipelineConfig;
use savor_core::{
    keys, Clock, DishId, DishRanking, DishStat, DistributionScope, RatingDistribution,
    RestaurantId, RestaurantSummary, ReviewStore, ScoredDish, StatCache, SummaryMode,
    SystemClock,
};

/// Serves rankings and dish stats. Never returns an error: store and cache
/// failures are logged and degrade to empty, absent or zero results.
pub struct LeaderboardReader {
    store: Arc<dyn ReviewStore>,
    cache: Arc<dyn StatCache>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
}

impl LeaderboardReader {
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

    /// Most popular dishes today across all restaurants.
    pub async fn top_today(&self, limit: usize) -> Vec<DishRanking> {
        let date = self.clock.today();
        let merged = self
            .merge_shards(&keys::daily_prefix(date), self.config.today_shard_fetch, limit)
            .await;
        if !merged.is_empty() {
            return merged;
        }

        debug!(%date, "no daily popularity in cache, ranking from orders");
        self.store
            .most_ordered_on(date, limit)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "top-today fallback query failed");
                Vec::new()
            })
    }

    /// Best rated dishes across all restaurants.
    pub async fn top_all_time(&self, limit: usize) -> Vec<DishRanking> {
        let merged = self
            .merge_shards(keys::ALL_TIME_PREFIX, self.config.alltime_shard_fetch, limit)
            .await;
        if !merged.is_empty() {
            return merged;
        }

        debug!("no all-time leaderboard in cache, ranking from dishes");
        self.store.best_rated(limit).await.unwrap_or_else(|e| {
            warn!(error = %e, "top-all-time fallback query failed");
            Vec::new()
        })
    }

    /// Cached stat of one dish. Cache only: a miss is `None` even when the
    /// Primary Store knows the dish.
    pub async fn dish_stat(
        &self,
        restaurant_id: RestaurantId,
        dish_id: DishId,
    ) -> Option<DishStat> {
        let key = keys::dish_stat(restaurant_id, dish_id);
        match self.cache.dish_stat(&key).await {
            Ok(stat) => stat.map(|stat| DishStat { dish_id, stat }),
            Err(e) => {
                warn!(key = %key, error = %e, "dish stat lookup failed");
                None
            }
        }
    }

    /// Per-restaurant highlights. Each lookup that misses is left out.
    pub async fn restaurant_summary(
        &self,
        restaurant_id: RestaurantId,
        mode: SummaryMode,
    ) -> RestaurantSummary {
        let mut summary = RestaurantSummary::default();
        match mode {
            SummaryMode::Today => {
                summary.most_popular_today = self.most_popular_today(restaurant_id).await;
            }
            SummaryMode::Day => {
                summary.most_popular_dish = self.most_popular_today(restaurant_id).await;
            }
            SummaryMode::AllTime => {
                summary.best_rated_dish = self.best_rated(restaurant_id).await;
            }
            SummaryMode::Both => {
                summary.most_popular_today = self.most_popular_today(restaurant_id).await;
                summary.best_rated_dish = self.best_rated(restaurant_id).await;
            }
        }
        summary
    }

    /// Top of one restaurant's all-time board, names resolved.
    pub async fn top_dishes(
        &self,
        restaurant_id: RestaurantId,
        limit: usize,
    ) -> Vec<DishRanking> {
        let board = keys::all_time(restaurant_id);
        let scored = self.read_shard(&board, limit).await;
        self.resolve(restaurant_id, scored)
            .await
            .into_iter()
            .filter(|r| r.restaurant_id == restaurant_id)
            .collect()
    }

    /// Review counts for every star rating. A failed query yields zeros.
    pub async fn rating_distribution(&self, scope: DistributionScope) -> RatingDistribution {
        let restaurant_id = match scope {
            DistributionScope::Restaurant(id) => Some(id),
            DistributionScope::Global => None,
        };
        match self.store.rating_counts(restaurant_id).await {
            Ok(rows) => RatingDistribution::from_counts(rows),
            Err(e) => {
                warn!(?scope, error = %e, "rating distribution query failed");
                RatingDistribution::empty()
            }
        }
    }

    async fn most_popular_today(&self, restaurant_id: RestaurantId) -> Option<DishRanking> {
        let key = keys::daily_popularity(self.clock.today(), restaurant_id);
        self.top_one(restaurant_id, &key).await
    }

    async fn best_rated(&self, restaurant_id: RestaurantId) -> Option<DishRanking> {
        self.top_one(restaurant_id, &keys::all_time(restaurant_id)).await
    }

    async fn top_one(&self, restaurant_id: RestaurantId, key: &str) -> Option<DishRanking> {
        let scored = self.read_shard(key, 1).await;
        self.resolve(restaurant_id, scored)
            .await
            .into_iter()
            .find(|r| r.restaurant_id == restaurant_id)
    }

    async fn read_shard(&self, key: &str, count: usize) -> Vec<ScoredDish> {
        self.cache.top_scores(key, count).await.unwrap_or_else(|e| {
            warn!(key, error = %e, "leaderboard shard read failed");
            Vec::new()
        })
    }

    /// Gather the top `per_shard` of every shard under `prefix`, attach dish
    /// metadata and merge.
    async fn merge_shards(
        &self,
        prefix: &str,
        per_shard: usize,
        limit: usize,
    ) -> Vec<DishRanking> {
        let shard_keys = match self.cache.keys_with_prefix(prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix, error = %e, "shard enumeration failed");
                return Vec::new();
            }
        };

        let shards: Vec<(RestaurantId, String)> = shard_keys
            .into_iter()
            .filter_map(|key| keys::shard_restaurant(&key, prefix).map(|r| (r, key)))
            .collect();
        if shards.is_empty() {
            return Vec::new();
        }

        let reads = shards.iter().map(|(_, key)| self.read_shard(key, per_shard));
        let per_shard_scores = join_all(reads).await;

        let mut candidates = Vec::new();
        for ((restaurant_id, _), scored) in shards.iter().zip(per_shard_scores) {
            candidates.extend(self.resolve(*restaurant_id, scored).await);
        }
        debug!(prefix, shards = shards.len(), candidates = candidates.len(), "merging shards");

        crate::merge::merge_ranked(candidates, limit)
    }

    /// Attach name and review count to each scored dish, dropping dishes the
    /// Primary Store no longer has.
    async fn resolve(
        &self,
        shard_restaurant: RestaurantId,
        scored: Vec<ScoredDish>,
    ) -> Vec<DishRanking> {
        let lookups = scored.iter().map(|s| self.store.dish_meta(s.dish_id));
        let metas = join_all(lookups).await;

        scored
            .into_iter()
            .zip(metas)
            .filter_map(|(s, meta)| match meta {
                Ok(Some(meta)) => Some(DishRanking {
                    dish_id: s.dish_id,
                    dish_name: meta.name,
                    restaurant_id: meta.restaurant_id,
                    score: s.score,
                    review_count: meta.review_count,
                }),
                Ok(None) => {
                    debug!(dish_id = s.dish_id, shard_restaurant, "ranked dish no longer exists");
                    None
                }
                Err(e) => {
                    warn!(dish_id = s.dish_id, error = %e, "dish metadata lookup failed");
                    None
                }
            })
            .collect()
    }
}
