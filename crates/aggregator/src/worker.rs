//! Ordered consume loop over the Event Bus.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use savor_queue::{parse_message, QueueConsumer, QueueMessage};

use crate::consumer::AggregationConsumer;

/// Base delay after a failed poll; doubled per consecutive failure.
const POLL_RETRY_BASE_MS: u64 = 1000;
const POLL_RETRY_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub received: u64,
    pub processed: u64,
    /// Messages whose body was not a valid event. They are acked anyway.
    pub undecodable: u64,
    pub ack_failures: u64,
}

impl AggregationConsumer {
    /// Drain `source` one message at a time until `shutdown` is notified.
    /// Signal with `notify_one` so a stop requested before the loop starts
    /// waiting is kept as a permit.
    ///
    /// Each message is processed to completion and then acked, including
    /// messages that fail to decode. A shutdown received mid-batch lets the
    /// in-flight message finish; the rest of the batch stays unacked and is
    /// redelivered to the next run.
    pub async fn run(
        &self,
        source: &dyn QueueConsumer,
        batch_size: u32,
        shutdown: Arc<Notify>,
    ) -> RunStats {
        let mut stats = RunStats::default();
        let mut consecutive_errors: u32 = 0;

        let stop = shutdown.notified();
        tokio::pin!(stop);
        // Register now so a notification sent while processing is not lost.
        stop.as_mut().enable();

        info!(batch_size, "aggregation consumer started");

        'outer: loop {
            let polled = tokio::select! {
                biased;
                _ = &mut stop => break 'outer,
                polled = source.poll_batch(batch_size) => polled,
            };

            let messages = match polled {
                Ok(messages) => {
                    consecutive_errors = 0;
                    messages
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff = Duration::from_millis(
                        POLL_RETRY_BASE_MS * 2u64.pow(consecutive_errors.min(5)),
                    )
                    .min(POLL_RETRY_CAP);
                    warn!(
                        error = %e,
                        consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        "event bus poll failed"
                    );
                    tokio::select! {
                        biased;
                        _ = &mut stop => break 'outer,
                        _ = tokio::time::sleep(backoff) => continue,
                    }
                }
            };

            for msg in &messages {
                stats.received += 1;
                self.handle(source, msg, &mut stats).await;

                if stop.as_mut().now_or_never().is_some() {
                    break 'outer;
                }
            }
        }

        info!(
            received = stats.received,
            processed = stats.processed,
            undecodable = stats.undecodable,
            ack_failures = stats.ack_failures,
            "aggregation consumer stopped"
        );
        stats
    }

    async fn handle(&self, source: &dyn QueueConsumer, msg: &QueueMessage, stats: &mut RunStats) {
        match parse_message(msg) {
            Ok(event) => {
                debug!(message_id = %msg.id, attempt = msg.attempt_count, "processing event");
                self.process(&event).await;
                stats.processed += 1;
            }
            Err(e) => {
                // Left unacked it would be redelivered forever.
                error!(message_id = %msg.id, key = %msg.key, error = %e, "dropping undecodable event");
                stats.undecodable += 1;
            }
        }

        if let Err(e) = source.ack(&msg.id).await {
            warn!(message_id = %msg.id, error = %e, "failed to ack message");
            stats.ack_failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use savor_core::config::PipelineConfig;
    use savor_core::{keys, AggregationEvent, EventKind, EventPublisher, StatCache};
    use savor_queue::MemoryBus;
    use savor_storage::{MemoryReviewStore, MemoryStatCache};

    fn event(dish_id: i64) -> AggregationEvent {
        AggregationEvent {
            kind: EventKind::NewReview,
            dish_id,
            restaurant_id: 100,
            order_id: 1,
            rating: 5,
            timestamp: Utc::now(),
        }
    }

    fn consumer() -> (Arc<MemoryStatCache>, AggregationConsumer) {
        let store = Arc::new(MemoryReviewStore::new());
        store.add_dish(1, 100, "Ramen");
        store.add_dish(2, 100, "Gyoza");
        let cache = Arc::new(MemoryStatCache::new());
        let consumer = AggregationConsumer::new(store, cache.clone(), PipelineConfig::default());
        (cache, consumer)
    }

    /// Wait until the bus has nothing queued or pending, then stop the loop.
    async fn stop_when_drained(bus: Arc<MemoryBus>, shutdown: Arc<Notify>) {
        while bus.queued_count() > 0 || bus.pending_count() > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        shutdown.notify_one();
    }

    #[tokio::test]
    async fn test_run_processes_and_acks_everything() {
        let (cache, consumer) = consumer();
        let bus = Arc::new(MemoryBus::new());
        bus.publish(&event(1)).await.unwrap();
        bus.push_raw("x", "not an event");
        bus.publish(&event(2)).await.unwrap();
        bus.publish(&event(1)).await.unwrap();

        let shutdown = Arc::new(Notify::new());
        let stopper = tokio::spawn(stop_when_drained(bus.clone(), shutdown.clone()));
        let stats = consumer.run(bus.as_ref(), 10, shutdown).await;
        stopper.await.unwrap();

        assert_eq!(stats.received, 4);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.undecodable, 1);
        assert_eq!(bus.acked().len(), 4);

        let today = keys::daily_popularity(Utc::now().date_naive(), 100);
        let top = cache.top_scores(&today, 10).await.unwrap();
        assert_eq!(top[0].dish_id, 1);
        assert_eq!(top[0].score, 2.0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let (_, consumer) = consumer();
        let bus = MemoryBus::new();
        let shutdown = Arc::new(Notify::new());

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.notify_one();
        });

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            consumer.run(&bus, 10, shutdown),
        )
        .await
        .expect("loop did not stop");
        assert_eq!(stats, RunStats::default());
    }

    #[tokio::test]
    async fn test_stop_requested_before_start_is_kept() {
        let (_, consumer) = consumer();
        let bus = MemoryBus::new();
        bus.publish(&event(1)).await.unwrap();
        let shutdown = Arc::new(Notify::new());
        shutdown.notify_one();

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            consumer.run(&bus, 10, shutdown),
        )
        .await
        .expect("loop did not stop");
        assert_eq!(stats.received, 0);
        assert_eq!(bus.queued_count(), 1);
    }
}
