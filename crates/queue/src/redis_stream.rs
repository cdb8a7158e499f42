//! Redis Streams backend for the review event bus.
//!
//! Producers `XADD` one entry per event with two fields, `key` (the dish id,
//! used as partition key) and `payload` (the JSON event). Consumers read
//! through a consumer group with `XREADGROUP` and `XACK` after processing,
//! which gives at-least-once delivery: anything read but never acked stays in
//! the group's pending list and is re-read on the next start.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamId, StreamMaxlen, StreamPendingReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, RedisResult};
use tracing::{debug, info};

use savor_core::config::BusConfig;
use savor_core::{AggregationEvent, EventPublisher, SavorError};

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;

const FIELD_KEY: &str = "key";
const FIELD_PAYLOAD: &str = "payload";

async fn connection(redis_url: &str) -> Result<ConnectionManager, QueueError> {
    let client = Client::open(redis_url)
        .map_err(|e| QueueError::Connection(format!("invalid redis url: {e}")))?;
    client
        .get_connection_manager()
        .await
        .map_err(|e| QueueError::Connection(format!("redis connect failed: {e}")))
}

/// Entry ids are `{millis}-{seq}`; the millis part is the append time.
fn entry_timestamp(id: &str) -> DateTime<Utc> {
    id.split('-')
        .next()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn to_queue_message(entry: StreamId, attempt_count: u32) -> QueueMessage {
    QueueMessage {
        key: entry.get::<String>(FIELD_KEY).unwrap_or_default(),
        body: entry.get::<String>(FIELD_PAYLOAD).unwrap_or_default(),
        timestamp: entry_timestamp(&entry.id),
        id: entry.id,
        attempt_count,
    }
}

/// `MAXLEN ~ n` for a positive cap, no trimming for 0.
fn trim_policy(max_len: usize) -> Option<StreamMaxlen> {
    (max_len > 0).then_some(StreamMaxlen::Approx(max_len))
}

// ── Publisher ───────────────────────────────────────────────────────

pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    stream: String,
    trim: Option<StreamMaxlen>,
}

impl RedisStreamPublisher {
    pub fn new(conn: ConnectionManager, stream: impl Into<String>, max_len: usize) -> Self {
        Self {
            conn,
            stream: stream.into(),
            trim: trim_policy(max_len),
        }
    }

    pub async fn connect(redis_url: &str, bus: &BusConfig) -> Result<Self, QueueError> {
        let conn = connection(redis_url).await?;
        info!(stream = %bus.stream, max_len = bus.max_len, "redis stream publisher initialized");
        Ok(Self::new(conn, bus.stream.clone(), bus.max_len))
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, event: &AggregationEvent) -> Result<(), SavorError> {
        let body = event.to_json()?;
        let key = event.partition_key();
        let mut con = self.conn.clone();

        let fields = [(FIELD_KEY, key), (FIELD_PAYLOAD, body)];

        let appended: RedisResult<String> = match self.trim {
            Some(maxlen) => con.xadd_maxlen(&self.stream, maxlen, "*", &fields).await,
            None => con.xadd(&self.stream, "*", &fields).await,
        };
        let id = appended
            .map_err(|e| SavorError::Publish(format!("XADD {} failed: {e}", self.stream)))?;

        debug!(
            stream = %self.stream,
            entry_id = %id,
            kind = %event.kind,
            dish_id = event.dish_id,
            "event published"
        );
        Ok(())
    }
}

// ── Consumer ────────────────────────────────────────────────────────

/// Read position inside this consumer's pending list from earlier runs.
///
/// The list is walked once, front to back. An entry whose ack fails stays
/// pending but is not read again until the next start.
#[derive(Debug)]
struct BacklogCursor {
    /// `None` once the end of the list was reached.
    next: Mutex<Option<String>>,
}

impl BacklogCursor {
    fn new() -> Self {
        Self {
            next: Mutex::new(Some("0".to_string())),
        }
    }

    fn position(&self) -> Option<String> {
        self.next.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Move past the last entry of a backlog read. An empty read ends the
    /// backlog; returns true when this call ended it.
    fn advance(&self, last_id: Option<&str>) -> bool {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        match last_id {
            Some(id) => {
                *next = Some(id.to_string());
                false
            }
            None => next.take().is_some(),
        }
    }
}

pub struct RedisStreamConsumer {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    block_ms: u64,
    backlog: BacklogCursor,
}

impl RedisStreamConsumer {
    /// Connect and make sure the consumer group exists.
    pub async fn connect(redis_url: &str, bus: &BusConfig) -> Result<Self, QueueError> {
        let conn = connection(redis_url).await?;
        let consumer = Self {
            conn,
            stream: bus.stream.clone(),
            group: bus.group.clone(),
            consumer: bus.consumer.clone(),
            block_ms: bus.block_ms,
            backlog: BacklogCursor::new(),
        };
        consumer.ensure_group().await?;

        info!(
            stream = %consumer.stream,
            group = %consumer.group,
            consumer = %consumer.consumer,
            "redis stream consumer initialized"
        );
        Ok(consumer)
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut con = self.conn.clone();
        let created: RedisResult<()> = con
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;
        match created {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(group = %self.group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl QueueConsumer for RedisStreamConsumer {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        // An explicit id replays our own unacked entries after it; ">" asks
        // for never-delivered ones.
        let backlog_pos = self.backlog.position();
        let drained = backlog_pos.is_none();
        let start_id = backlog_pos.as_deref().unwrap_or(">");

        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max_messages.max(1) as usize);
        if drained {
            opts = opts.block(self.block_ms as usize);
        }

        let mut con = self.conn.clone();
        let reply: Option<StreamReadReply> = con
            .xread_options(&[&self.stream], &[start_id], &opts)
            .await?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|k| k.ids)
            .collect();

        if !drained && self.backlog.advance(entries.last().map(|e| e.id.as_str())) {
            info!(consumer = %self.consumer, "pending backlog drained, reading new entries");
        }

        let attempt_count = if drained { 1 } else { 2 };
        debug!(count = entries.len(), backlog = !drained, "received stream entries");

        Ok(entries
            .into_iter()
            .map(|entry| to_queue_message(entry, attempt_count))
            .collect())
    }

    async fn ack(&self, id: &str) -> Result<(), QueueError> {
        let mut con = self.conn.clone();
        let _: i64 = con
            .xack(&self.stream, &self.group, &[id])
            .await
            .map_err(|e| QueueError::Ack(format!("XACK {id} failed: {e}")))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let mut con = self.conn.clone();
        let pending: StreamPendingReply = con.xpending(&self.stream, &self.group).await?;

        Ok(QueueHealth {
            connected: true,
            pending: Some(pending.count() as u64),
            provider: "redis-stream".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_is_walked_once() {
        let cursor = BacklogCursor::new();
        assert_eq!(cursor.position().as_deref(), Some("0"));

        assert!(!cursor.advance(Some("1718366400000-0")));
        assert_eq!(cursor.position().as_deref(), Some("1718366400000-0"));

        // A read past the last pending entry ends the backlog for good.
        assert!(cursor.advance(None));
        assert_eq!(cursor.position(), None);
        assert!(!cursor.advance(None));
        assert_eq!(cursor.position(), None);
    }

    #[test]
    fn test_trim_policy() {
        assert_eq!(trim_policy(0), None);
        assert_eq!(trim_policy(1000), Some(StreamMaxlen::Approx(1000)));
    }

    #[test]
    fn test_entry_timestamp_from_id() {
        let ts = entry_timestamp("1718366400000-3");
        assert_eq!(ts.to_rfc3339(), "2024-06-14T12:00:00+00:00");
    }

    #[test]
    fn test_entry_timestamp_falls_back_on_garbage() {
        let before = Utc::now();
        let ts = entry_timestamp("not-an-id");
        assert!(ts >= before);
    }
}
