//! In-memory Primary Store and Cache Mirror for tests.
//!
//! Both fakes can be switched into a failing mode to exercise outage paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use savor_core::{
    CachedDishStat, DishAggregate, DishId, DishMeta, DishRanking, NewReview, OrderId,
    RestaurantId, Review, ReviewStore, SavorError, ScoredDish, StatCache, UpsertOutcome,
};

// ── Primary Store ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DishRow {
    restaurant_id: RestaurantId,
    name: String,
    avg_rating: f64,
    review_count: i64,
}

#[derive(Debug, Clone)]
struct OrderRow {
    restaurant_id: RestaurantId,
    created_at: DateTime<Utc>,
    dish_ids: Vec<DishId>,
}

#[derive(Default)]
struct StoreState {
    dishes: BTreeMap<DishId, DishRow>,
    orders: BTreeMap<OrderId, OrderRow>,
    reviews: Vec<Review>,
    next_review_id: i64,
}

#[derive(Default)]
pub struct MemoryReviewStore {
    state: Mutex<StoreState>,
    failing: AtomicBool,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dish(&self, dish_id: DishId, restaurant_id: RestaurantId, name: &str) {
        self.state.lock().unwrap().dishes.insert(
            dish_id,
            DishRow {
                restaurant_id,
                name: name.to_string(),
                avg_rating: 0.0,
                review_count: 0,
            },
        );
    }

    /// Record a placed order with one order line per entry of `dish_ids`.
    pub fn add_order(
        &self,
        order_id: OrderId,
        restaurant_id: RestaurantId,
        created_at: DateTime<Utc>,
        dish_ids: &[DishId],
    ) {
        self.state.lock().unwrap().orders.insert(
            order_id,
            OrderRow {
                restaurant_id,
                created_at,
                dish_ids: dish_ids.to_vec(),
            },
        );
    }

    /// Delete a dish together with its reviews and order lines.
    pub fn remove_dish(&self, dish_id: DishId) {
        let mut state = self.state.lock().unwrap();
        state.dishes.remove(&dish_id);
        state.reviews.retain(|r| r.dish_id != dish_id);
        for order in state.orders.values_mut() {
            order.dish_ids.retain(|d| *d != dish_id);
        }
    }

    /// Overwrite a dish's stored aggregate without touching reviews.
    pub fn set_dish_aggregate(&self, dish_id: DishId, avg_rating: f64, review_count: i64) {
        if let Some(dish) = self.state.lock().unwrap().dishes.get_mut(&dish_id) {
            dish.avg_rating = avg_rating;
            dish.review_count = review_count;
        }
    }

    /// Make every subsequent call fail with a store error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reviews(&self) -> Vec<Review> {
        self.state.lock().unwrap().reviews.clone()
    }

    fn check(&self) -> Result<(), SavorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SavorError::Store("memory store unavailable".into()));
        }
        Ok(())
    }
}

fn sort_by_score_desc(rankings: &mut [DishRanking]) {
    rankings.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn dish_in_order(
        &self,
        dish_id: DishId,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<bool, SavorError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .get(&order_id)
            .map(|o| o.restaurant_id == restaurant_id && o.dish_ids.contains(&dish_id))
            .unwrap_or(false))
    }

    async fn upsert_review(&self, review: &NewReview) -> Result<UpsertOutcome, SavorError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        if let Some(existing) = state
            .reviews
            .iter_mut()
            .find(|r| (r.dish_id, r.order_id, r.restaurant_id) == review.natural_key())
        {
            existing.rating = review.rating;
            existing.comment = review.comment.clone();
            existing.created_at = now;
            return Ok(UpsertOutcome::Updated(existing.clone()));
        }

        state.next_review_id += 1;
        let stored = Review {
            id: state.next_review_id,
            dish_id: review.dish_id,
            order_id: review.order_id,
            restaurant_id: review.restaurant_id,
            rating: review.rating,
            comment: review.comment.clone(),
            created_at: now,
        };
        state.reviews.push(stored.clone());
        Ok(UpsertOutcome::Inserted(stored))
    }

    async fn list_dish_reviews(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<Vec<Review>, SavorError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut reviews: Vec<Review> = state
            .reviews
            .iter()
            .filter(|r| r.dish_id == dish_id && r.restaurant_id == restaurant_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(reviews)
    }

    async fn recompute_dish_aggregate(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<bool, SavorError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let ratings: Vec<i32> = state
            .reviews
            .iter()
            .filter(|r| r.dish_id == dish_id)
            .map(|r| r.rating)
            .collect();
        let aggregate = DishAggregate::from_ratings(dish_id, restaurant_id, &ratings);

        match state.dishes.get_mut(&dish_id) {
            Some(dish) if dish.restaurant_id == restaurant_id => {
                dish.avg_rating = aggregate.avg_rating;
                dish.review_count = aggregate.review_count;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn dish_aggregate(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<DishAggregate>, SavorError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .dishes
            .get(&dish_id)
            .filter(|d| d.restaurant_id == restaurant_id)
            .map(|d| DishAggregate {
                dish_id,
                restaurant_id,
                avg_rating: d.avg_rating,
                review_count: d.review_count,
            }))
    }

    async fn dish_meta(&self, dish_id: DishId) -> Result<Option<DishMeta>, SavorError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.dishes.get(&dish_id).map(|d| DishMeta {
            dish_id,
            name: d.name.clone(),
            restaurant_id: d.restaurant_id,
            review_count: d.review_count,
        }))
    }

    async fn most_ordered_on(
        &self,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<DishRanking>, SavorError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut counts: BTreeMap<DishId, i64> = BTreeMap::new();
        for order in state.orders.values() {
            if order.created_at.date_naive() != date {
                continue;
            }
            for dish_id in &order.dish_ids {
                *counts.entry(*dish_id).or_default() += 1;
            }
        }

        let mut rankings: Vec<DishRanking> = counts
            .into_iter()
            .filter_map(|(dish_id, count)| {
                state.dishes.get(&dish_id).map(|d| DishRanking {
                    dish_id,
                    dish_name: d.name.clone(),
                    restaurant_id: d.restaurant_id,
                    score: count as f64,
                    review_count: d.review_count,
                })
            })
            .collect();
        sort_by_score_desc(&mut rankings);
        rankings.truncate(limit);
        Ok(rankings)
    }

    async fn best_rated(&self, limit: usize) -> Result<Vec<DishRanking>, SavorError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut rankings: Vec<DishRanking> = state
            .dishes
            .iter()
            .filter(|(_, d)| d.avg_rating > 0.0)
            .map(|(dish_id, d)| DishRanking {
                dish_id: *dish_id,
                dish_name: d.name.clone(),
                restaurant_id: d.restaurant_id,
                score: d.avg_rating,
                review_count: d.review_count,
            })
            .collect();
        sort_by_score_desc(&mut rankings);
        rankings.truncate(limit);
        Ok(rankings)
    }

    async fn rating_counts(
        &self,
        restaurant_id: Option<RestaurantId>,
    ) -> Result<Vec<(i32, i64)>, SavorError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut counts: BTreeMap<i32, i64> = BTreeMap::new();
        for review in &state.reviews {
            if restaurant_id.map_or(true, |r| r == review.restaurant_id) {
                *counts.entry(review.rating).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

// ── Cache Mirror ────────────────────────────────────────────────────

#[derive(Default)]
struct CacheState {
    hashes: HashMap<String, CachedDishStat>,
    sorted_sets: HashMap<String, HashMap<DishId, f64>>,
    markers: HashSet<String>,
    ttls: HashMap<String, Duration>,
}

#[derive(Default)]
pub struct MemoryStatCache {
    state: Mutex<CacheState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStatCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Score of one member, bypassing the failure switches.
    pub fn score(&self, key: &str, dish_id: DishId) -> Option<f64> {
        let state = self.state.lock().unwrap();
        state.sorted_sets.get(key)?.get(&dish_id).copied()
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.state.lock().unwrap().ttls.get(key).copied()
    }

    /// Drop a key as if its TTL had run out.
    pub fn expire_now(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.hashes.remove(key);
        state.sorted_sets.remove(key);
        state.markers.remove(key);
        state.ttls.remove(key);
    }

    fn check_read(&self) -> Result<(), SavorError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SavorError::Cache("memory cache unavailable".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), SavorError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SavorError::Cache("memory cache unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StatCache for MemoryStatCache {
    async fn put_dish_stat(
        &self,
        key: &str,
        stat: &CachedDishStat,
        ttl: Duration,
    ) -> Result<(), SavorError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        state.hashes.insert(key.to_string(), stat.clone());
        state.ttls.insert(key.to_string(), ttl);
        Ok(())
    }

    async fn dish_stat(&self, key: &str) -> Result<Option<CachedDishStat>, SavorError> {
        self.check_read()?;
        Ok(self.state.lock().unwrap().hashes.get(key).cloned())
    }

    async fn incr_score(
        &self,
        key: &str,
        dish_id: DishId,
        delta: f64,
        ttl: Option<Duration>,
    ) -> Result<f64, SavorError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        let score = {
            let entry = state
                .sorted_sets
                .entry(key.to_string())
                .or_default()
                .entry(dish_id)
                .or_insert(0.0);
            *entry += delta;
            *entry
        };
        if let Some(ttl) = ttl {
            state.ttls.insert(key.to_string(), ttl);
        }
        Ok(score)
    }

    async fn set_score(&self, key: &str, dish_id: DishId, score: f64) -> Result<(), SavorError> {
        self.check_write()?;
        self.state
            .lock()
            .unwrap()
            .sorted_sets
            .entry(key.to_string())
            .or_default()
            .insert(dish_id, score);
        Ok(())
    }

    async fn top_scores(&self, key: &str, count: usize) -> Result<Vec<ScoredDish>, SavorError> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let Some(set) = state.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<ScoredDish> = set
            .iter()
            .map(|(dish_id, score)| ScoredDish {
                dish_id: *dish_id,
                score: *score,
            })
            .collect();
        // Redis orders equal scores by member, reversed for ZREVRANGE.
        members.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.dish_id.to_string().cmp(&a.dish_id.to_string()))
        });
        members.truncate(count);
        Ok(members)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SavorError> {
        self.check_read()?;
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state
            .hashes
            .keys()
            .chain(state.sorted_sets.keys())
            .chain(state.markers.iter())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn set_marker(&self, key: &str, ttl: Duration) -> Result<(), SavorError> {
        self.check_write()?;
        let mut state = self.state.lock().unwrap();
        state.markers.insert(key.to_string());
        state.ttls.insert(key.to_string(), ttl);
        Ok(())
    }

    async fn marker_exists(&self, key: &str) -> Result<bool, SavorError> {
        self.check_read()?;
        Ok(self.state.lock().unwrap().markers.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_review(rating: i32) -> NewReview {
        NewReview {
            dish_id: 1,
            order_id: 10,
            restaurant_id: 100,
            rating,
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity() {
        let store = MemoryReviewStore::new();
        let first = store.upsert_review(&new_review(2)).await.unwrap();
        let second = store.upsert_review(&new_review(4)).await.unwrap();

        assert!(!first.is_update());
        assert!(second.is_update());
        assert_eq!(first.review().id, second.review().id);
        assert_eq!(store.reviews().len(), 1);
        assert_eq!(store.reviews()[0].rating, 4);
    }

    #[tokio::test]
    async fn test_recompute_requires_matching_restaurant() {
        let store = MemoryReviewStore::new();
        store.add_dish(1, 100, "Ramen");
        store.upsert_review(&new_review(5)).await.unwrap();

        assert!(!store.recompute_dish_aggregate(1, 999).await.unwrap());
        assert!(store.recompute_dish_aggregate(1, 100).await.unwrap());

        let agg = store.dish_aggregate(1, 100).await.unwrap().unwrap();
        assert_eq!(agg.avg_rating, 5.0);
        assert_eq!(agg.review_count, 1);
    }

    #[tokio::test]
    async fn test_incr_score_accumulates_and_sets_ttl() {
        let cache = MemoryStatCache::new();
        let ttl = Duration::from_secs(60);
        cache.incr_score("z", 7, 1.0, Some(ttl)).await.unwrap();
        let score = cache.incr_score("z", 7, 1.0, Some(ttl)).await.unwrap();

        assert_eq!(score, 2.0);
        assert_eq!(cache.ttl("z"), Some(ttl));
    }

    #[tokio::test]
    async fn test_top_scores_descending() {
        let cache = MemoryStatCache::new();
        cache.set_score("z", 1, 3.0).await.unwrap();
        cache.set_score("z", 2, 9.0).await.unwrap();
        cache.set_score("z", 3, 5.0).await.unwrap();

        let top = cache.top_scores("z", 2).await.unwrap();
        let ids: Vec<_> = top.iter().map(|s| s.dish_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let cache = MemoryStatCache::new();
        cache.set_fail_writes(true);
        assert!(cache.set_score("z", 1, 1.0).await.is_err());
        assert!(cache.top_scores("z", 1).await.unwrap().is_empty());

        cache.set_fail_reads(true);
        assert!(cache.keys_with_prefix("z").await.is_err());
    }
}
