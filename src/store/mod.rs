//! Store Module
//!
//! Durable, timestamped storage of `(slug, content, last_modified)` records
//! with dirty reads, staleness-aware reads and transactional writes.

mod disk;
mod record;
mod table;


use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ContentCacheError, Result};

// Re-export public types
pub use disk::DiskTable;
pub use record::{next_timestamp, Content, ContentRecord, SinceLookup, Slug, StoredValue};
pub use table::{MemoryTable, Table, WriteOp};

// == Public Constants ==
/// Default bound on waiting for a table to become ready
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default table name
pub const DEFAULT_TABLE: &str = "content";

/// Default node name
pub const DEFAULT_NODE: &str = "local";

// == Residency ==
/// Where this node keeps its copy of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Replayed from and persisted to the table log
    Disk,
    /// Held in memory only
    Memory,
}

// == Store Config ==
/// Bootstrap parameters for a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory for disk-resident tables (created if absent)
    pub data_dir: PathBuf,
    /// Table name; the log file is `<data_dir>/<table>.log`
    pub table: String,
    /// Name of this node
    pub node: String,
    /// Nodes that keep a disk copy
    pub replicas: HashSet<String>,
    /// Bound on waiting for the table to become ready
    pub ready_timeout: Duration,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>, replicas: HashSet<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            table: DEFAULT_TABLE.to_string(),
            node: DEFAULT_NODE.to_string(),
            replicas,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Nodes inside the replica set keep the table on disk.
    pub fn residency(&self) -> Residency {
        if self.replicas.contains(&self.node) {
            Residency::Disk
        } else {
            Residency::Memory
        }
    }
}

// == Store ==
struct StoreInner<K, V> {
    table: Arc<dyn Table<K, V>>,
    /// Serializes transactions so per-slug stamps stay monotonic
    writes: Arc<Mutex<()>>,
    name: String,
    residency: Residency,
}

/// Handle to a timestamped content table.
///
/// Cloning is cheap; all clones address the same table.
pub struct Store<K, V> {
    inner: Arc<StoreInner<K, V>>,
}

impl<K, V> Clone for Store<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Slug, V: Content> Store<K, V> {
    // == Start ==
    /// Opens or creates the table described by `config`.
    ///
    /// Disk-resident tables are opened on the blocking pool and must become
    /// ready within `config.ready_timeout`.
    pub async fn start(config: StoreConfig) -> Result<Self> {
        let residency = config.residency();

        let table: Arc<dyn Table<K, V>> = match residency {
            Residency::Memory => Arc::new(MemoryTable::<K, V>::new()),
            Residency::Disk => {
                let dir = config.data_dir.clone();
                let name = config.table.clone();
                let open = async move {
                    tokio::task::spawn_blocking(move || DiskTable::<K, V>::open(&dir, &name))
                        .await
                        .map_err(|e| ContentCacheError::StartupFailed(e.to_string()))?
                };
                Arc::new(wait_for_table(&config.table, config.ready_timeout, open).await?)
            }
        };

        info!(
            "Store '{}' ready on node '{}' ({:?}, {} records)",
            config.table,
            config.node,
            residency,
            table.len()
        );

        Ok(Self::from_table(config.table, residency, table))
    }

    /// Wraps an already-open table.
    pub fn from_table(
        name: impl Into<String>,
        residency: Residency,
        table: Arc<dyn Table<K, V>>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                table,
                writes: Arc::new(Mutex::new(())),
                name: name.into(),
                residency,
            }),
        }
    }

    /// A store backed only by process memory.
    pub fn in_memory() -> Self {
        Self::from_table(
            DEFAULT_TABLE,
            Residency::Memory,
            Arc::new(MemoryTable::<K, V>::new()),
        )
    }

    // == Get ==
    /// Dirty read of the current content for `slug`.
    pub async fn get(&self, slug: &K) -> Option<V> {
        let value = self.inner.table.dirty_read(slug);
        debug!("get {:?}: {}", slug, if value.is_some() { "hit" } else { "absent" });
        value.map(|value| value.content)
    }

    // == Get Since ==
    /// Staleness-aware read of `slug` against the reference time `since`.
    ///
    /// `None` if no record exists; `Unchanged` only if the record carries a
    /// timestamp strictly earlier than `since`.
    pub async fn get_since(
        &self,
        slug: &K,
        since: Option<DateTime<Utc>>,
    ) -> Option<SinceLookup<V>> {
        let value = self.inner.table.dirty_read(slug)?;
        Some(SinceLookup::evaluate(value, since))
    }

    // == Record ==
    /// Dirty read of the full record for `slug`.
    pub async fn record(&self, slug: &K) -> Option<ContentRecord<K, V>> {
        let value = self.inner.table.dirty_read(slug)?;
        Some(ContentRecord::from_stored(slug.clone(), value))
    }

    // == Set ==
    /// Writes `content` for `slug` in one transaction, stamped with the write time.
    ///
    /// Returns the stamp the record was written with. Any later write to the
    /// same slug is stamped strictly after it.
    pub async fn set(&self, slug: K, content: V) -> Result<DateTime<Utc>> {
        debug!("set {:?}", slug);
        self.write(move |table| {
            let previous = table.dirty_read(&slug).and_then(|value| value.last_modified);
            let stamp = next_timestamp(previous);
            let value = StoredValue::stamped(content, stamp);

            table.transact(WriteOp::Put { slug, value })?;
            Ok(stamp)
        })
        .await
    }

    // == Remove ==
    /// Deletes the record for `slug` in one transaction; a no-op if absent.
    pub async fn rm(&self, slug: K) -> Result<()> {
        debug!("rm {:?}", slug);
        self.write(move |table| table.transact(WriteOp::Delete { slug })).await
    }

    // == Compact ==
    /// Rewrites the durable log as a snapshot of the live records.
    ///
    /// Returns the number of log entries discarded.
    pub async fn compact(&self) -> Result<usize> {
        self.write(|table| table.compact()).await
    }

    /// Runs `write` on the blocking pool at the head of the write queue.
    ///
    /// The queue slot is held by the blocking task, so it is released only
    /// when the write has finished even if the caller stops waiting.
    async fn write<T, F>(&self, write: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Table<K, V>) -> Result<T> + Send + 'static,
    {
        let queue = Arc::clone(&self.inner.writes).lock_owned().await;
        let table = Arc::clone(&self.inner.table);

        tokio::task::spawn_blocking(move || {
            let _queue = queue;
            write(table.as_ref())
        })
        .await
        .map_err(|e| ContentCacheError::Transaction(e.to_string()))?
    }

    // == Introspection ==
    /// Number of live records.
    pub fn len(&self) -> usize {
        self.inner.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries in the durable log.
    pub fn log_len(&self) -> usize {
        self.inner.table.log_len()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn residency(&self) -> Residency {
        self.inner.residency
    }
}

// == Readiness ==
/// Waits at most `timeout` for `open` to produce a ready table.
pub async fn wait_for_table<T, F>(table: &str, timeout: Duration, open: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, open).await {
        Ok(result) => result,
        Err(_) => Err(ContentCacheError::StartupTimeout {
            table: table.to_string(),
            waited_ms: timeout.as_millis() as u64,
        }),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn replicas(nodes: &[&str]) -> HashSet<String> {
        nodes.iter().map(|node| node.to_string()).collect()
    }

    fn seeded(slug: &str, content: &str) -> MemoryTable<String, String> {
        let mut records = HashMap::new();
        records.insert(
            slug.to_string(),
            StoredValue::stamped(content.to_string(), Utc::now()),
        );
        MemoryTable::with_records(records)
    }

    /// A table whose transactions always fail.
    struct FailingTable {
        image: MemoryTable<String, String>,
    }

    impl Table<String, String> for FailingTable {
        fn dirty_read(&self, slug: &String) -> Option<StoredValue<String>> {
            self.image.dirty_read(slug)
        }

        fn transact(&self, _op: WriteOp<String, String>) -> Result<()> {
            Err(ContentCacheError::Transaction("disk full".to_string()))
        }

        fn len(&self) -> usize {
            self.image.len()
        }
    }

    /// A table that stalls the first write of `"first"` content.
    struct StallingTable {
        image: MemoryTable<String, String>,
        stalled: AtomicBool,
    }

    impl Table<String, String> for StallingTable {
        fn dirty_read(&self, slug: &String) -> Option<StoredValue<String>> {
            self.image.dirty_read(slug)
        }

        fn transact(&self, op: WriteOp<String, String>) -> Result<()> {
            if let WriteOp::Put { value, .. } = &op {
                if value.content == "first" {
                    self.stalled.store(true, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }
            }
            self.image.transact(op)
        }

        fn len(&self) -> usize {
            self.image.len()
        }
    }

    async fn disk_store(dir: &TempDir) -> Store<String, String> {
        Store::start(StoreConfig::new(dir.path(), replicas(&["local"])))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = Store::in_memory();

        store.set("foo".to_string(), "bar".to_string()).await.unwrap();
        assert_eq!(store.get(&"foo".to_string()).await, Some("bar".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_absent() {
        let store: Store<String, String> = Store::in_memory();

        assert_eq!(store.get(&"missing".to_string()).await, None);
        assert_eq!(store.get_since(&"missing".to_string(), None).await, None);
        assert_eq!(store.get_since(&"missing".to_string(), Some(Utc::now())).await, None);
        assert!(store.record(&"missing".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn test_rm_twice_succeeds() {
        let store = Store::in_memory();
        store.set("foo".to_string(), "bar".to_string()).await.unwrap();

        store.rm("foo".to_string()).await.unwrap();
        store.rm("foo".to_string()).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get(&"foo".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_set_overwrites_and_restamps() {
        let store = Store::in_memory();
        let slug = "page".to_string();

        store.set(slug.clone(), "v1".to_string()).await.unwrap();
        let first = store.record(&slug).await.unwrap();
        store.set(slug.clone(), "v2".to_string()).await.unwrap();
        let second = store.record(&slug).await.unwrap();

        assert_eq!(second.content, "v2");
        assert!(second.last_modified > first.last_modified);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_set_returns_assigned_stamp() {
        let store = Store::in_memory();
        let slug = "page".to_string();

        let first = store.set(slug.clone(), "v1".to_string()).await.unwrap();
        assert_eq!(store.record(&slug).await.unwrap().last_modified, Some(first));

        let second = store.set(slug.clone(), "v2".to_string()).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_failed_transaction_propagates_and_keeps_record() {
        let table = Arc::new(FailingTable {
            image: seeded("page", "v1"),
        });
        let store: Store<String, String> = Store::from_table("content", Residency::Memory, table);
        let slug = "page".to_string();

        let set = store.set(slug.clone(), "v2".to_string()).await;
        assert!(matches!(set, Err(ContentCacheError::Transaction(_))));
        assert_eq!(store.get(&slug).await, Some("v1".to_string()));

        let rm = store.rm(slug.clone()).await;
        assert!(matches!(rm, Err(ContentCacheError::Transaction(_))));
        assert_eq!(store.get(&slug).await, Some("v1".to_string()));
    }

    #[tokio::test]
    async fn test_abandoned_write_keeps_its_queue_slot() {
        let table = Arc::new(StallingTable {
            image: MemoryTable::new(),
            stalled: AtomicBool::new(false),
        });
        let shared: Arc<dyn Table<String, String>> = table.clone();
        let store = Store::from_table("content", Residency::Memory, shared);
        let slug = "page".to_string();

        let first = tokio::spawn({
            let store = store.clone();
            let slug = slug.clone();
            async move { store.set(slug, "first".to_string()).await }
        });
        while !table.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        first.abort();

        // The second write waits for the abandoned one to commit
        let stamp = store.set(slug.clone(), "second".to_string()).await.unwrap();
        let record = store.record(&slug).await.unwrap();
        assert_eq!(record.content, "second");
        assert_eq!(record.last_modified, Some(stamp));
    }

    #[tokio::test]
    async fn test_get_since_staleness() {
        let store = Store::in_memory();
        let slug = "page".to_string();
        store.set(slug.clone(), "c".to_string()).await.unwrap();
        let t0 = store.record(&slug).await.unwrap().last_modified.unwrap();

        assert_eq!(
            store.get_since(&slug, Some(t0)).await,
            Some(SinceLookup::Modified("c".to_string()))
        );
        assert_eq!(
            store.get_since(&slug, Some(t0 - ChronoDuration::seconds(5))).await,
            Some(SinceLookup::Modified("c".to_string()))
        );
        assert_eq!(
            store.get_since(&slug, Some(t0 + ChronoDuration::milliseconds(1))).await,
            Some(SinceLookup::Unchanged)
        );
        assert_eq!(
            store.get_since(&slug, None).await,
            Some(SinceLookup::Modified("c".to_string()))
        );
    }

    #[tokio::test]
    async fn test_residency_from_replica_set() {
        let temp_dir = TempDir::new().unwrap();

        let on_disk = disk_store(&temp_dir).await;
        assert_eq!(on_disk.residency(), Residency::Disk);
        assert_eq!(on_disk.name(), "content");

        let config = StoreConfig::new(temp_dir.path().join("unused"), replicas(&["other"]));
        let in_memory: Store<String, String> = Store::start(config).await.unwrap();
        assert_eq!(in_memory.residency(), Residency::Memory);
        assert!(!temp_dir.path().join("unused").exists());
    }

    #[tokio::test]
    async fn test_disk_store_survives_restart() {
        let temp_dir = TempDir::new().unwrap();

        let store = disk_store(&temp_dir).await;
        store.set("foo".to_string(), "bar".to_string()).await.unwrap();
        store.set("gone".to_string(), "x".to_string()).await.unwrap();
        store.rm("gone".to_string()).await.unwrap();
        let stamp = store.record(&"foo".to_string()).await.unwrap().last_modified;
        drop(store);

        let store = disk_store(&temp_dir).await;
        let record = store.record(&"foo".to_string()).await.unwrap();
        assert_eq!(record.content, "bar");
        assert_eq!(record.last_modified, stamp);
        assert_eq!(store.get(&"gone".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_compact_through_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = disk_store(&temp_dir).await;

        for i in 0..3 {
            store.set("foo".to_string(), i.to_string()).await.unwrap();
        }
        assert_eq!(store.log_len(), 3);
        assert_eq!(store.compact().await.unwrap(), 2);
        assert_eq!(store.log_len(), 1);
        assert_eq!(store.get(&"foo".to_string()).await, Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_start_fails_when_data_dir_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("not-a-dir");
        std::fs::write(&file_path, b"occupied").unwrap();

        let result: Result<Store<String, String>> =
            Store::start(StoreConfig::new(&file_path, replicas(&["local"]))).await;
        assert!(matches!(result, Err(ContentCacheError::StartupFailed(_))));
    }

    #[tokio::test]
    async fn test_wait_for_table_times_out() {
        let never = std::future::pending::<Result<()>>();
        let result = wait_for_table("content", Duration::from_millis(20), never).await;

        match result {
            Err(ContentCacheError::StartupTimeout { table, waited_ms }) => {
                assert_eq!(table, "content");
                assert_eq!(waited_ms, 20);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_for_table_passes_through_reason() {
        let failing = async { Err::<(), _>(ContentCacheError::StartupFailed("disk gone".into())) };
        let result = wait_for_table("content", Duration::from_secs(1), failing).await;
        assert!(matches!(
            result,
            Err(ContentCacheError::StartupFailed(reason)) if reason == "disk gone"
        ));
    }
}
