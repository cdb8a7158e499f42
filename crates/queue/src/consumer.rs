//! Queue consumer trait and types.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A raw message received from the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Provider-assigned entry id, used to ack.
    pub id: String,
    /// Partition key the producer attached (the dish id).
    pub key: String,
    /// Raw message body (JSON string).
    pub body: String,
    /// When the message was appended to the bus.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been handed to a consumer.
    pub attempt_count: u32,
}

/// Health status of a bus connection.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub connected: bool,
    /// Messages delivered to the group but not yet acked.
    pub pending: Option<u64>,
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueHealth {{ connected: {}, pending: {:?}, provider: {} }}",
            self.connected, self.pending, self.provider
        )
    }
}

/// Consumer side of the Event Bus.
///
/// Delivery is at-least-once: a message that is not acked is handed out
/// again, either to this consumer after a restart or to another group member.
/// Messages come back in append order.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Poll up to `max_messages`. May block for the provider's long-poll
    /// window; returns an empty vec when nothing arrived.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Mark a message as processed so it is never redelivered.
    async fn ack(&self, id: &str) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<QueueHealth, QueueError>;
}
