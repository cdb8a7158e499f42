pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod keys;
pub mod review;
pub mod stats;
pub mod traits;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::*;
pub use event::{AggregationEvent, EventKind};
pub use review::*;
pub use stats::*;
pub use traits::{EventPublisher, ReviewStore, StatCache};
