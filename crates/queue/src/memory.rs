//! In-process bus for tests. Behaves like one stream with one consumer group:
//! ordered delivery, explicit acks, and redelivery of unacked messages.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use savor_core::{AggregationEvent, EventPublisher, SavorError};

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;

#[derive(Default)]
struct Inner {
    next_seq: u64,
    queued: VecDeque<QueueMessage>,
    pending: BTreeMap<u64, QueueMessage>,
    acked: Vec<String>,
    published: Vec<AggregationEvent>,
}

#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<Inner>,
    fail_publish: AtomicBool,
}

fn seq_of(id: &str) -> u64 {
    id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `publish` fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Append an arbitrary body, bypassing event encoding.
    pub fn push_raw(&self, key: &str, body: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        let id = format!("{}-0", inner.next_seq);
        inner.queued.push_back(QueueMessage {
            id: id.clone(),
            key: key.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            attempt_count: 1,
        });
        id
    }

    /// Every event successfully published, in order.
    pub fn published(&self) -> Vec<AggregationEvent> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Put every delivered-but-unacked message back at the head of the
    /// queue, oldest first. Returns how many were requeued.
    pub fn redeliver_pending(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let pending = std::mem::take(&mut inner.pending);
        let count = pending.len();
        for (_, mut msg) in pending.into_iter().rev() {
            msg.attempt_count += 1;
            inner.queued.push_front(msg);
        }
        count
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().unwrap().queued.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn acked(&self) -> Vec<String> {
        self.inner.lock().unwrap().acked.clone()
    }
}

#[async_trait]
impl EventPublisher for MemoryBus {
    async fn publish(&self, event: &AggregationEvent) -> Result<(), SavorError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SavorError::Publish("memory bus unavailable".into()));
        }
        let body = event.to_json()?;
        self.push_raw(&event.partition_key(), &body);
        self.inner.lock().unwrap().published.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for MemoryBus {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let batch: Vec<QueueMessage> = {
            let mut inner = self.inner.lock().unwrap();
            let take = (max_messages.max(1) as usize).min(inner.queued.len());
            let batch: Vec<QueueMessage> = inner.queued.drain(..take).collect();
            for msg in &batch {
                inner.pending.insert(seq_of(&msg.id), msg.clone());
            }
            batch
        };
        if batch.is_empty() {
            // Stand-in for a long poll so idle loops do not spin.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(batch)
    }

    async fn ack(&self, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.pending.remove(&seq_of(id)) {
            Some(_) => {
                inner.acked.push(id.to_string());
                Ok(())
            }
            None => Err(QueueError::Ack(format!("unknown or already acked id {id}"))),
        }
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        Ok(QueueHealth {
            connected: true,
            pending: Some(self.pending_count() as u64),
            provider: "memory".to_string(),
        })
    }
}
