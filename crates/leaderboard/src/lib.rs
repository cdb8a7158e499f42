//! Read path: ranked dish queries served from the cache with a Primary Store
//! fallback.

pub mod merge;
pub mod reader;

pub use merge::merge_ranked;
pub use reader::LeaderboardReader;
