pub mod consumer;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod parser;
pub mod redis_stream;

pub use consumer::{QueueConsumer, QueueHealth, QueueMessage};
pub use error::QueueError;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryBus;
pub use parser::parse_message;
pub use redis_stream::{RedisStreamConsumer, RedisStreamPublisher};
