use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::review::{DishId, RestaurantId, MAX_RATING, MIN_RATING};

/// Denormalized per-dish statistic held by the Primary Store.
///
/// Always a pure function of every review row for the dish, so replaying a
/// recomputation cannot drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishAggregate {
    pub dish_id: DishId,
    pub restaurant_id: RestaurantId,
    pub avg_rating: f64,
    pub review_count: i64,
}

impl DishAggregate {
    /// Mean rounded half-up to two decimals, computed in integer space so
    /// `4.125` lands on `4.13` the way `ROUND(numeric, 2)` does.
    pub fn from_ratings(dish_id: DishId, restaurant_id: RestaurantId, ratings: &[i32]) -> Self {
        let count = ratings.len() as i64;
        let avg_rating = if count == 0 {
            0.0
        } else {
            let sum: i64 = ratings.iter().map(|r| *r as i64).sum();
            let hundredths = (sum * 200 + count) / (2 * count);
            hundredths as f64 / 100.0
        };
        Self {
            dish_id,
            restaurant_id,
            avg_rating,
            review_count: count,
        }
    }
}

/// Cache mirror of a [`DishAggregate`]. Absence means "unknown", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDishStat {
    pub avg_rating: f64,
    pub review_count: i64,
    /// Epoch seconds of the write.
    pub last_updated: i64,
}

/// Point lookup result served to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishStat {
    pub dish_id: DishId,
    #[serde(flatten)]
    pub stat: CachedDishStat,
}

/// Display metadata for a dish, owned by the Primary Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishMeta {
    pub dish_id: DishId,
    pub name: String,
    pub restaurant_id: RestaurantId,
    pub review_count: i64,
}

/// One member of a ranking structure as read back from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredDish {
    pub dish_id: DishId,
    pub score: f64,
}

/// A ranked dish returned by leaderboard queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishRanking {
    pub dish_id: DishId,
    pub dish_name: String,
    pub restaurant_id: RestaurantId,
    pub score: f64,
    pub review_count: i64,
}

/// Which per-restaurant highlights to compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMode {
    /// Most popular dish today, reported as `most_popular_today`.
    Today,
    /// Most popular dish today, reported as `most_popular_dish`.
    Day,
    /// Best rated dish of all time.
    AllTime,
    /// Most popular today plus best rated.
    Both,
}

impl SummaryMode {
    /// Parse the `period` query value; anything unrecognised means `Both`.
    pub fn parse(period: &str) -> Self {
        match period {
            "today" => SummaryMode::Today,
            "day" => SummaryMode::Day,
            "all" => SummaryMode::AllTime,
            _ => SummaryMode::Both,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestaurantSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_popular_dish: Option<DishRanking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_rated_dish: Option<DishRanking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_popular_today: Option<DishRanking>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionScope {
    Restaurant(RestaurantId),
    Global,
}

/// Review counts per star rating. Always carries all five buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatingDistribution(BTreeMap<String, i64>);

impl RatingDistribution {
    pub fn empty() -> Self {
        Self(
            (MIN_RATING..=MAX_RATING)
                .map(|r| (r.to_string(), 0))
                .collect(),
        )
    }

    /// Build from `(rating, count)` rows. Ratings outside 1..=5 are ignored.
    pub fn from_counts(rows: impl IntoIterator<Item = (i32, i64)>) -> Self {
        let mut dist = Self::empty();
        for (rating, count) in rows {
            if (MIN_RATING..=MAX_RATING).contains(&rating) {
                dist.0.insert(rating.to_string(), count);
            }
        }
        dist
    }

    pub fn get(&self, rating: i32) -> i64 {
        self.0.get(&rating.to_string()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.0.values().sum()
    }
}
