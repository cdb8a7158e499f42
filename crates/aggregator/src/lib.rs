//! Aggregation step: folds review events into dish statistics and rankings.

pub mod consumer;
pub mod worker;

pub use consumer::{AggregationConsumer, ProcessReport};
pub use worker::RunStats;
