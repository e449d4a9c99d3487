//! Log Compaction Task
//!
//! Background task that periodically rewrites a store's table log as a
//! snapshot of its live records.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{Content, Slug, Store};

/// Shortest interval between compaction runs
const MIN_COMPACTION_INTERVAL_SECS: u64 = 1;

/// Spawns a background task that periodically compacts the store's log.
///
/// The task runs until aborted, sleeping for the specified interval between
/// runs. A failed compaction is logged and retried on the next run.
///
/// # Arguments
/// * `store` - The store whose log is compacted
/// * `interval_secs` - Interval in seconds between compaction runs (at least 1)
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let store = Store::<String, String>::start(config.store_config()).await?;
/// let compaction_handle = spawn_compaction_task(store.clone(), 60);
/// // Later, during shutdown:
/// compaction_handle.abort();
/// ```
pub fn spawn_compaction_task<K: Slug, V: Content>(
    store: Store<K, V>,
    interval_secs: u64,
) -> JoinHandle<()> {
    spawn_with_interval(store, interval_from_secs(interval_secs))
}

fn interval_from_secs(interval_secs: u64) -> Duration {
    Duration::from_secs(interval_secs.max(MIN_COMPACTION_INTERVAL_SECS))
}

fn spawn_with_interval<K: Slug, V: Content>(
    store: Store<K, V>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting log compaction task for '{}' with interval of {:?}",
            store.name(),
            interval
        );

        loop {
            tokio::time::sleep(interval).await;

            match store.compact().await {
                Ok(0) => debug!("Log compaction: nothing to discard"),
                Ok(discarded) => info!("Log compaction: discarded {} entries", discarded),
                Err(e) => warn!("Log compaction failed: {}", e),
            }
        }
    })
}
