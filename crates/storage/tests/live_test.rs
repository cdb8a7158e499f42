//! Tests against a real PostgreSQL and Redis.
//!
//! `#[ignore]`d for CI. Run with `DATABASE_URL=... REDIS_URL=... cargo test -- --ignored`.

use std::time::Duration;

use sqlx::PgPool;

use savor_core::{keys, CachedDishStat, NewReview, ReviewStore, StatCache};
use savor_storage::{PgReviewStore, RedisStatCache};

async fn pg_store() -> PgReviewStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&url).await.expect("connect postgres");
    let store = PgReviewStore::new(pool);
    store.migrate().await.expect("migrate");
    store
}

async fn redis_cache() -> RedisStatCache {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/".into());
    RedisStatCache::connect(&url).await.expect("connect redis")
}

/// Seed one restaurant, one dish and one order containing it. Returns ids.
async fn seed(pool: &PgPool) -> (i64, i64, i64) {
    let restaurant_id: i64 =
        sqlx::query_scalar("INSERT INTO restaurants (name) VALUES ('live-test') RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap();
    let dish_id: i64 = sqlx::query_scalar(
        "INSERT INTO dishes (restaurant_id, name) VALUES ($1, 'Pho') RETURNING id",
    )
    .bind(restaurant_id)
    .fetch_one(pool)
    .await
    .unwrap();
    let order_id: i64 =
        sqlx::query_scalar("INSERT INTO orders (restaurant_id) VALUES ($1) RETURNING id")
            .bind(restaurant_id)
            .fetch_one(pool)
            .await
            .unwrap();
    sqlx::query("INSERT INTO order_items (order_id, dish_id) VALUES ($1, $2)")
        .bind(order_id)
        .bind(dish_id)
        .execute(pool)
        .await
        .unwrap();
    (restaurant_id, dish_id, order_id)
}

#[tokio::test]
#[ignore]
async fn pg_upsert_and_recompute() {
    let store = pg_store().await;
    let (restaurant_id, dish_id, order_id) = seed(store.pool()).await;

    assert!(store
        .dish_in_order(dish_id, order_id, restaurant_id)
        .await
        .unwrap());
    assert!(!store
        .dish_in_order(dish_id, order_id, restaurant_id + 1)
        .await
        .unwrap());

    let review = |rating| NewReview {
        dish_id,
        order_id,
        restaurant_id,
        rating,
        comment: "live".into(),
    };
    let first = store.upsert_review(&review(3)).await.unwrap();
    let second = store.upsert_review(&review(5)).await.unwrap();
    assert!(!first.is_update());
    assert!(second.is_update());
    assert_eq!(first.review().id, second.review().id);

    assert!(store
        .recompute_dish_aggregate(dish_id, restaurant_id)
        .await
        .unwrap());
    let agg = store
        .dish_aggregate(dish_id, restaurant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agg.avg_rating, 5.0);
    assert_eq!(agg.review_count, 1);

    let counts = store.rating_counts(Some(restaurant_id)).await.unwrap();
    assert_eq!(counts, vec![(5, 1)]);
}

#[tokio::test]
#[ignore]
async fn redis_round_trips_cache_structures() {
    let cache = redis_cache().await;
    let key = keys::dish_stat(990_001, 1);
    let stat = CachedDishStat {
        avg_rating: 4.5,
        review_count: 2,
        last_updated: 1_718_366_400,
    };

    cache
        .put_dish_stat(&key, &stat, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(cache.dish_stat(&key).await.unwrap(), Some(stat));

    let board = keys::all_time(990_001);
    cache.set_score(&board, 1, 4.5).await.unwrap();
    cache.set_score(&board, 2, 3.0).await.unwrap();
    let top = cache.top_scores(&board, 1).await.unwrap();
    assert_eq!(top[0].dish_id, 1);

    let marker = keys::review_marker(1, 990_001);
    cache
        .set_marker(&marker, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(cache.marker_exists(&marker).await.unwrap());
    assert!(cache
        .keys_with_prefix(keys::ALL_TIME_PREFIX)
        .await
        .unwrap()
        .contains(&board));
}

#[tokio::test]
#[ignore]
async fn redis_incr_score_returns_total_and_sets_ttl() {
    let cache = redis_cache().await;
    let date = chrono::NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
    let key = keys::daily_popularity(date, 990_002);
    let ttl = Duration::from_secs(120);

    assert_eq!(cache.incr_score(&key, 3, 1.0, Some(ttl)).await.unwrap(), 1.0);
    assert_eq!(cache.incr_score(&key, 3, 1.0, Some(ttl)).await.unwrap(), 2.0);
    assert_eq!(cache.incr_score(&key, 4, 1.0, None).await.unwrap(), 1.0);

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/".into());
    let client = redis::Client::open(url).unwrap();
    let mut con = client.get_multiplexed_async_connection().await.unwrap();
    let remaining: i64 = redis::cmd("TTL").arg(&key).query_async(&mut con).await.unwrap();
    assert!(remaining > 0 && remaining <= 120, "unexpected ttl {remaining}");

    let top = cache.top_scores(&key, 2).await.unwrap();
    assert_eq!((top[0].dish_id, top[0].score), (3, 2.0));

    let _: i64 = redis::cmd("DEL").arg(&key).query_async(&mut con).await.unwrap();
}
