//! Redis-backed Cache Mirror.
//!
//! Dish stats are hashes, rankings are sorted sets with the dish id as
//! member, dedup markers are plain keys. Every write that carries a TTL sets
//! it in the same `MULTI` as the value so a key is never left without one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{info, warn};

use savor_core::keys::{FIELD_AVG_RATING, FIELD_LAST_UPDATED, FIELD_REVIEW_COUNT};
use savor_core::{CachedDishStat, DishId, SavorError, ScoredDish, StatCache};

use crate::error::{cache_err, StorageError};

#[derive(Clone)]
pub struct RedisStatCache {
    conn: ConnectionManager,
}

impl RedisStatCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        info!("Redis stat cache connected");
        Ok(Self { conn })
    }
}

fn parse_stat(key: &str, fields: &HashMap<String, String>) -> Option<CachedDishStat> {
    let avg_rating = fields.get(FIELD_AVG_RATING)?.parse().ok();
    let review_count = fields.get(FIELD_REVIEW_COUNT)?.parse().ok();
    let last_updated = fields.get(FIELD_LAST_UPDATED)?.parse().ok();

    match (avg_rating, review_count, last_updated) {
        (Some(avg_rating), Some(review_count), Some(last_updated)) => Some(CachedDishStat {
            avg_rating,
            review_count,
            last_updated,
        }),
        _ => {
            warn!(key, "malformed dish stat hash, treating as absent");
            None
        }
    }
}

#[async_trait]
impl StatCache for RedisStatCache {
    async fn put_dish_stat(
        &self,
        key: &str,
        stat: &CachedDishStat,
        ttl: Duration,
    ) -> Result<(), SavorError> {
        let mut con = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                key,
                &[
                    (FIELD_AVG_RATING, stat.avg_rating.to_string()),
                    (FIELD_REVIEW_COUNT, stat.review_count.to_string()),
                    (FIELD_LAST_UPDATED, stat.last_updated.to_string()),
                ],
            )
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .ignore()
            .query_async(&mut con)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn dish_stat(&self, key: &str) -> Result<Option<CachedDishStat>, SavorError> {
        let mut con = self.conn.clone();
        let fields: HashMap<String, String> = con.hgetall(key).await.map_err(cache_err)?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(parse_stat(key, &fields))
    }

    async fn incr_score(
        &self,
        key: &str,
        dish_id: DishId,
        delta: f64,
        ttl: Option<Duration>,
    ) -> Result<f64, SavorError> {
        let mut con = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().zincr(key, dish_id, delta);
        if let Some(ttl) = ttl {
            pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs()).ignore();
        }
        let (score,): (f64,) = pipe.query_async(&mut con).await.map_err(cache_err)?;
        Ok(score)
    }

    async fn set_score(&self, key: &str, dish_id: DishId, score: f64) -> Result<(), SavorError> {
        let mut con = self.conn.clone();
        let _: i64 = con.zadd(key, dish_id, score).await.map_err(cache_err)?;
        Ok(())
    }

    async fn top_scores(&self, key: &str, count: usize) -> Result<Vec<ScoredDish>, SavorError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut con = self.conn.clone();
        let members: Vec<(String, f64)> = con
            .zrevrange_withscores(key, 0, count as isize - 1)
            .await
            .map_err(cache_err)?;

        Ok(members
            .into_iter()
            .filter_map(|(member, score)| match member.parse::<DishId>() {
                Ok(dish_id) => Some(ScoredDish { dish_id, score }),
                Err(_) => {
                    warn!(key, member = %member, "non-numeric ranking member skipped");
                    None
                }
            })
            .collect())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SavorError> {
        let mut con = self.conn.clone();
        let mut keys: Vec<String> = con.keys(format!("{prefix}*")).await.map_err(cache_err)?;
        keys.sort();
        Ok(keys)
    }

    async fn set_marker(&self, key: &str, ttl: Duration) -> Result<(), SavorError> {
        let mut con = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut con)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn marker_exists(&self, key: &str) -> Result<bool, SavorError> {
        let mut con = self.conn.clone();
        con.exists(key).await.map_err(cache_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_complete_hash() {
        let stat = parse_stat(
            "dish:1:2",
            &fields(&[
                ("avg_rating", "4.33"),
                ("review_count", "3"),
                ("last_updated", "1718366400"),
            ]),
        )
        .unwrap();

        assert_eq!(stat.avg_rating, 4.33);
        assert_eq!(stat.review_count, 3);
        assert_eq!(stat.last_updated, 1718366400);
    }

    #[test]
    fn test_parse_partial_hash_is_absent() {
        assert!(parse_stat("dish:1:2", &fields(&[("avg_rating", "4.0")])).is_none());
        assert!(parse_stat(
            "dish:1:2",
            &fields(&[
                ("avg_rating", "high"),
                ("review_count", "3"),
                ("last_updated", "0"),
            ]),
        )
        .is_none());
    }
}
