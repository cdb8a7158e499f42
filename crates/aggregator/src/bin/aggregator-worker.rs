//! aggregator-worker: drains the review stream into dish statistics.
//!
//! Reads `new_review` / `updated_review` events from the Redis stream
//! consumer group, recomputes the dish aggregate in PostgreSQL, and refreshes
//! the Redis dish stat and both leaderboards.
//!
//! Runs until SIGINT/SIGTERM; the in-flight event finishes before exit.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{debug, info};

use savor_aggregator::AggregationConsumer;
use savor_core::Config;
use savor_queue::{QueueConsumer, RedisStreamConsumer};
use savor_storage::{PgReviewStore, RedisStatCache};

// ── CLI ─────────────────────────────────────────────────────────────

/// Aggregation worker for dish reviews.
#[derive(Parser, Debug)]
#[command(name = "aggregator-worker", version, about)]
struct Cli {
    /// Consumer name within the group. Overrides BUS_CONSUMER.
    #[arg(long)]
    consumer: Option<String>,

    /// Skip running database migrations on startup.
    #[arg(long, env = "SKIP_MIGRATIONS", default_value_t = false)]
    skip_migrations: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    savor_core::config::load_dotenv();
    let mut config = Config::from_env();
    if let Some(consumer) = cli.consumer {
        config.bus.consumer = consumer;
    }
    config.log_summary();
    debug!(config = %config.redacted_summary(), "effective configuration");

    let store = PgReviewStore::connect(&config.postgres).await?;
    if !cli.skip_migrations {
        store.migrate().await?;
    }

    let redis_url = config.redis.url();
    let cache = RedisStatCache::connect(&redis_url).await?;
    let source = RedisStreamConsumer::connect(&redis_url, &config.bus).await?;
    info!(health = %source.health_check().await?, "event bus ready");

    let consumer = AggregationConsumer::new(
        Arc::new(store),
        Arc::new(cache),
        config.pipeline.clone(),
    );

    let shutdown = Arc::new(Notify::new());
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => info!("shutdown signal received, finishing in-flight event"),
            Err(e) => tracing::error!(error = %e, "signal handler failed, shutting down"),
        }
        // Leaves a permit when the loop has not started waiting yet.
        trigger.notify_one();
    });

    info!("aggregator-worker starting");
    let stats = consumer
        .run(&source, config.bus.batch_size, shutdown)
        .await;

    info!(processed = stats.processed, "aggregator-worker exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => res?,
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    Ok(())
}
