use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use savor_core::config::PostgresConfig;
use savor_core::{
    DishAggregate, DishId, DishMeta, DishRanking, NewReview, OrderId, RestaurantId, Review,
    ReviewStore, SavorError, UpsertOutcome,
};

use crate::error::{store_err, StorageError};

#[derive(Debug, sqlx::FromRow)]
struct ReviewRow {
    id: i64,
    dish_id: i64,
    order_id: i64,
    restaurant_id: i64,
    rating: i32,
    comment: String,
    created_at: DateTime<Utc>,
}

impl From<ReviewRow> for Review {
    fn from(r: ReviewRow) -> Self {
        Review {
            id: r.id,
            dish_id: r.dish_id,
            order_id: r.order_id,
            restaurant_id: r.restaurant_id,
            rating: r.rating,
            comment: r.comment,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RankingRow {
    id: i64,
    name: String,
    restaurant_id: i64,
    score: f64,
    review_count: i64,
}

impl From<RankingRow> for DishRanking {
    fn from(r: RankingRow) -> Self {
        DishRanking {
            dish_id: r.id,
            dish_name: r.name,
            restaurant_id: r.restaurant_id,
            score: r.score,
            review_count: r.review_count,
        }
    }
}

/// PostgreSQL-backed Primary Store.
#[derive(Clone)]
pub struct PgReviewStore {
    pool: PgPool,
}

impl PgReviewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!(host = %config.host, database = %config.database, "PostgreSQL connected");
        Ok(Self { pool })
    }

    /// Apply the migrations under `migrations/`.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied successfully");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ReviewStore for PgReviewStore {
    async fn dish_in_order(
        &self,
        dish_id: DishId,
        order_id: OrderId,
        restaurant_id: RestaurantId,
    ) -> Result<bool, SavorError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM order_items oi
                JOIN orders o ON oi.order_id = o.id
                WHERE oi.dish_id = $1 AND oi.order_id = $2 AND o.restaurant_id = $3
             )",
        )
        .bind(dish_id)
        .bind(order_id)
        .bind(restaurant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn upsert_review(&self, review: &NewReview) -> Result<UpsertOutcome, SavorError> {
        // xmax is 0 only for a row this statement inserted.
        let (id, created_at, inserted) = sqlx::query_as::<_, (i64, DateTime<Utc>, bool)>(
            "INSERT INTO reviews (dish_id, order_id, restaurant_id, rating, comment)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (dish_id, order_id, restaurant_id)
             DO UPDATE SET rating = EXCLUDED.rating,
                           comment = EXCLUDED.comment,
                           created_at = now()
             RETURNING id, created_at, (xmax = 0) AS inserted",
        )
        .bind(review.dish_id)
        .bind(review.order_id)
        .bind(review.restaurant_id)
        .bind(review.rating)
        .bind(&review.comment)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let stored = Review {
            id,
            dish_id: review.dish_id,
            order_id: review.order_id,
            restaurant_id: review.restaurant_id,
            rating: review.rating,
            comment: review.comment.clone(),
            created_at,
        };
        debug!(review_id = id, inserted, "review upserted");

        Ok(if inserted {
            UpsertOutcome::Inserted(stored)
        } else {
            UpsertOutcome::Updated(stored)
        })
    }

    async fn list_dish_reviews(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<Vec<Review>, SavorError> {
        let rows = sqlx::query_as::<_, ReviewRow>(
            "SELECT id, dish_id, order_id, restaurant_id, rating, comment, created_at
             FROM reviews
             WHERE dish_id = $1 AND restaurant_id = $2
             ORDER BY created_at DESC, id DESC",
        )
        .bind(dish_id)
        .bind(restaurant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(Review::from).collect())
    }

    async fn recompute_dish_aggregate(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<bool, SavorError> {
        let result = sqlx::query(
            "UPDATE dishes SET
                avg_rating = COALESCE(
                    (SELECT ROUND(AVG(rating)::numeric, 2) FROM reviews WHERE dish_id = $1), 0),
                review_count = (SELECT COUNT(*) FROM reviews WHERE dish_id = $1)
             WHERE id = $1 AND restaurant_id = $2",
        )
        .bind(dish_id)
        .bind(restaurant_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn dish_aggregate(
        &self,
        dish_id: DishId,
        restaurant_id: RestaurantId,
    ) -> Result<Option<DishAggregate>, SavorError> {
        let row = sqlx::query_as::<_, (f64, i64)>(
            "SELECT COALESCE(avg_rating, 0)::float8, COALESCE(review_count, 0)::bigint
             FROM dishes WHERE id = $1 AND restaurant_id = $2",
        )
        .bind(dish_id)
        .bind(restaurant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|(avg_rating, review_count)| DishAggregate {
            dish_id,
            restaurant_id,
            avg_rating,
            review_count,
        }))
    }

    async fn dish_meta(&self, dish_id: DishId) -> Result<Option<DishMeta>, SavorError> {
        let row = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT name, restaurant_id, COALESCE(review_count, 0)::bigint
             FROM dishes WHERE id = $1",
        )
        .bind(dish_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|(name, restaurant_id, review_count)| DishMeta {
            dish_id,
            name,
            restaurant_id,
            review_count,
        }))
    }

    async fn most_ordered_on(
        &self,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<DishRanking>, SavorError> {
        let rows = sqlx::query_as::<_, RankingRow>(
            "SELECT d.id, d.name, d.restaurant_id,
                    COUNT(oi.id)::float8 AS score,
                    COALESCE(d.review_count, 0)::bigint AS review_count
             FROM dishes d
             JOIN order_items oi ON d.id = oi.dish_id
             JOIN orders o ON oi.order_id = o.id
             WHERE (o.created_at AT TIME ZONE 'UTC')::date = $1
             GROUP BY d.id, d.name, d.restaurant_id, d.review_count
             ORDER BY score DESC
             LIMIT $2",
        )
        .bind(date)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(DishRanking::from).collect())
    }

    async fn best_rated(&self, limit: usize) -> Result<Vec<DishRanking>, SavorError> {
        let rows = sqlx::query_as::<_, RankingRow>(
            "SELECT id, name, restaurant_id,
                    avg_rating::float8 AS score,
                    COALESCE(review_count, 0)::bigint AS review_count
             FROM dishes
             WHERE avg_rating > 0
             ORDER BY avg_rating DESC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(DishRanking::from).collect())
    }

    async fn rating_counts(
        &self,
        restaurant_id: Option<RestaurantId>,
    ) -> Result<Vec<(i32, i64)>, SavorError> {
        sqlx::query_as::<_, (i32, i64)>(
            "SELECT rating, COUNT(*)
             FROM reviews
             WHERE ($1::bigint IS NULL OR restaurant_id = $1)
             GROUP BY rating",
        )
        .bind(restaurant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)
    }
}
