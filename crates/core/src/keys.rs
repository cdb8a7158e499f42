//! Cache key layout.
//!
//! These strings are shared with every other reader and writer of the cache
//! and must not change shape:
//!
//! | key | value |
//! |---|---|
//! | `dish:{restaurant_id}:{dish_id}` | hash `{avg_rating, review_count, last_updated}` |
//! | `analytics:daily:{YYYY-MM-DD}:{restaurant_id}` | sorted set `dish_id -> popularity` |
//! | `analytics:alltime:{restaurant_id}` | sorted set `dish_id -> avg_rating` |
//! | `review:{dish_id}:{order_id}` | dedup marker |

use chrono::NaiveDate;

use crate::review::{DishId, OrderId, RestaurantId};

pub const FIELD_AVG_RATING: &str = "avg_rating";
pub const FIELD_REVIEW_COUNT: &str = "review_count";
pub const FIELD_LAST_UPDATED: &str = "last_updated";

pub const DAILY_PREFIX: &str = "analytics:daily:";
pub const ALL_TIME_PREFIX: &str = "analytics:alltime:";

pub fn dish_stat(restaurant_id: RestaurantId, dish_id: DishId) -> String {
    format!("dish:{restaurant_id}:{dish_id}")
}

pub fn date_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Prefix shared by every restaurant's popularity shard for `date`.
pub fn daily_prefix(date: NaiveDate) -> String {
    format!("{DAILY_PREFIX}{}:", date_label(date))
}

pub fn daily_popularity(date: NaiveDate, restaurant_id: RestaurantId) -> String {
    format!("{}{restaurant_id}", daily_prefix(date))
}

pub fn all_time(restaurant_id: RestaurantId) -> String {
    format!("{ALL_TIME_PREFIX}{restaurant_id}")
}

pub fn review_marker(dish_id: DishId, order_id: OrderId) -> String {
    format!("review:{dish_id}:{order_id}")
}

/// Recover the restaurant id from a shard key produced under `prefix`.
pub fn shard_restaurant(key: &str, prefix: &str) -> Option<RestaurantId> {
    key.strip_prefix(prefix)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn june_14() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 14).unwrap()
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(dish_stat(3, 12), "dish:3:12");
        assert_eq!(daily_popularity(june_14(), 3), "analytics:daily:2025-06-14:3");
        assert_eq!(all_time(3), "analytics:alltime:3");
        assert_eq!(review_marker(12, 99), "review:12:99");
    }

    #[test]
    fn test_daily_prefix_zero_pads() {
        let jan_2 = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert_eq!(daily_prefix(jan_2), "analytics:daily:2026-01-02:");
    }

    #[test]
    fn test_shard_restaurant_roundtrip() {
        let prefix = daily_prefix(june_14());
        let key = daily_popularity(june_14(), 42);
        assert_eq!(shard_restaurant(&key, &prefix), Some(42));
        assert_eq!(shard_restaurant(&all_time(7), ALL_TIME_PREFIX), Some(7));
    }

    #[test]
    fn test_shard_restaurant_rejects_foreign_keys() {
        assert_eq!(shard_restaurant("analytics:alltime:abc", ALL_TIME_PREFIX), None);
        assert_eq!(shard_restaurant("dish:1:2", ALL_TIME_PREFIX), None);
    }
}
