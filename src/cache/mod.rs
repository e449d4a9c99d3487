//! Cache Module
//!
//! The fetcher-backed front: independent cache units that invoke a swappable
//! fetcher, plus the store-backed fetch-through composition.

mod actor;
pub mod fetcher;
mod stats;
mod through;

// Re-export public types
pub use actor::Cache;
pub use fetcher::{FetchFuture, Fetcher, SharedFetcher};
pub use stats::FetchStats;
pub use through::FetchThrough;

// == Public Constants ==
/// Number of calls a cache unit queues before callers wait
pub const MAILBOX_CAPACITY: usize = 64;
