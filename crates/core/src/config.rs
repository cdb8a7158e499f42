use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub bus: BusConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SAVOR_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SAVOR_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            redis: RedisConfig::from_env_profiled(p),
            bus: BusConfig::from_env_profiled(p),
            pipeline: PipelineConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:  host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!("  redis:     host={}:{}", self.redis.host, self.redis.port);
        tracing::info!(
            "  bus:       stream={}, group={}, consumer={}, max_len={}",
            self.bus.stream,
            self.bus.group,
            self.bus.consumer,
            self.bus.max_len
        );
        tracing::info!(
            "  pipeline:  duplicate_policy={}, shard_fetch=({}, {})",
            self.pipeline.duplicate_policy.as_str(),
            self.pipeline.today_shard_fetch,
            self.pipeline.alltime_shard_fetch
        );
    }

    /// Machine-readable view of the effective settings, without secrets.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "redis": {
                "host": self.redis.host,
                "port": self.redis.port,
                "auth": self.redis.password.is_some(),
            },
            "bus": {
                "stream": self.bus.stream,
                "group": self.bus.group,
                "consumer": self.bus.consumer,
                "max_len": self.bus.max_len,
            },
            "pipeline": {
                "dish_stat_ttl_secs": self.pipeline.dish_stat_ttl_secs,
                "daily_popularity_ttl_secs": self.pipeline.daily_popularity_ttl_secs,
                "dedup_marker_ttl_secs": self.pipeline.dedup_marker_ttl_secs,
                "duplicate_policy": self.pipeline.duplicate_policy.as_str(),
            },
        })
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "savor"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 25),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Redis ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl RedisConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "REDIS_HOST", "localhost"),
            port: profiled_env_u16(p, "REDIS_PORT", 6379),
            password: profiled_env_opt(p, "REDIS_PASSWORD"),
        }
    }

    pub fn url(&self) -> String {
        match &self.password {
            Some(pass) => format!("redis://:{}@{}:{}/", pass, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

// ── Event bus ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Stream (topic) the review events are appended to.
    pub stream: String,
    /// Consumer group shared by aggregator instances.
    pub group: String,
    /// This instance's name inside the group.
    pub consumer: String,
    /// Long-poll duration for one read.
    pub block_ms: u64,
    pub batch_size: u32,
    /// Approximate cap on stream length, applied on every append. 0 disables
    /// trimming.
    pub max_len: usize,
}

impl BusConfig {
    fn from_env_profiled(p: &str) -> Self {
        let consumer_default = default_consumer_name(std::env::var("HOSTNAME").ok().as_deref());
        Self {
            stream: profiled_env_or(p, "BUS_STREAM", "reviews"),
            group: profiled_env_or(p, "BUS_GROUP", "agg-svc-consumer"),
            consumer: profiled_env_or(p, "BUS_CONSUMER", &consumer_default),
            block_ms: profiled_env_u64(p, "BUS_BLOCK_MS", 5000),
            batch_size: profiled_env_u32(p, "BUS_BATCH_SIZE", 10),
            max_len: profiled_env_u64(p, "BUS_MAX_LEN", 100_000) as usize,
        }
    }
}

/// `aggregator-{hostname}`, or `aggregator-1` when the host has no name.
pub fn default_consumer_name(hostname: Option<&str>) -> String {
    match hostname.map(str::trim) {
        Some(host) if !host.is_empty() => format!("aggregator-{host}"),
        _ => "aggregator-1".to_string(),
    }
}

// ── Pipeline ──────────────────────────────────────────────────

/// What ReviewWriter does when a dedup marker already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Marker is advisory; the existing row is updated in place.
    Upsert,
    /// Marker present means `DuplicateReview`.
    Reject,
}

impl DuplicatePolicy {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "reject" => DuplicatePolicy::Reject,
            _ => DuplicatePolicy::Upsert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Upsert => "upsert",
            DuplicatePolicy::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub dish_stat_ttl_secs: u64,
    pub daily_popularity_ttl_secs: u64,
    pub dedup_marker_ttl_secs: u64,
    pub duplicate_policy: DuplicatePolicy,
    /// Per-restaurant candidates taken before the global "today" merge.
    pub today_shard_fetch: usize,
    /// Per-restaurant candidates taken before the global all-time merge.
    pub alltime_shard_fetch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dish_stat_ttl_secs: 24 * 60 * 60,
            daily_popularity_ttl_secs: 7 * 24 * 60 * 60,
            dedup_marker_ttl_secs: 7 * 24 * 60 * 60,
            duplicate_policy: DuplicatePolicy::Upsert,
            today_shard_fetch: 5,
            alltime_shard_fetch: 10,
        }
    }
}

impl PipelineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            dish_stat_ttl_secs: profiled_env_u64(p, "DISH_STAT_TTL_SECS", d.dish_stat_ttl_secs),
            daily_popularity_ttl_secs: profiled_env_u64(
                p,
                "DAILY_POPULARITY_TTL_SECS",
                d.daily_popularity_ttl_secs,
            ),
            dedup_marker_ttl_secs: profiled_env_u64(
                p,
                "DEDUP_MARKER_TTL_SECS",
                d.dedup_marker_ttl_secs,
            ),
            duplicate_policy: DuplicatePolicy::parse(&profiled_env_or(
                p,
                "DUPLICATE_POLICY",
                "upsert",
            )),
            today_shard_fetch: profiled_env_u32(p, "TODAY_SHARD_FETCH", 5) as usize,
            alltime_shard_fetch: profiled_env_u32(p, "ALLTIME_SHARD_FETCH", 10) as usize,
        }
    }

    pub fn dish_stat_ttl(&self) -> Duration {
        Duration::from_secs(self.dish_stat_ttl_secs)
    }

    pub fn daily_popularity_ttl(&self) -> Duration {
        Duration::from_secs(self.daily_popularity_ttl_secs)
    }

    pub fn dedup_marker_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_marker_ttl_secs)
    }
}
