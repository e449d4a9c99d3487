//! Content Cache - a fetcher-backed cache over a timestamped slug store
//!
//! Callers fetch content by slug through a [`Cache`] unit whose fetcher can be
//! swapped at runtime. A [`Store`] persists `(slug, content, last_modified)`
//! records and answers "has this changed since T"; [`FetchThrough`] composes
//! the two so unchanged content is not fetched upstream again.

pub mod cache;
pub mod config;
pub mod error;
pub mod store;
pub mod tasks;

pub use cache::{Cache, FetchThrough};
pub use config::Config;
pub use error::{ContentCacheError, Result};
pub use store::{SinceLookup, Store, StoreConfig};
pub use tasks::spawn_compaction_task;
