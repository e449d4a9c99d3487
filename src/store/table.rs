//! Table Module
//!
//! The storage primitive under the store: dirty reads plus all-or-nothing
//! writes and deletes.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{ContentCacheError, Result};
use crate::store::record::{Content, Slug, StoredValue};

// == Write Operation ==
/// A single transactional mutation. Also the on-disk log entry shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOp<K, V> {
    Put { slug: K, value: StoredValue<V> },
    Delete { slug: K },
}

// == Table Trait ==
/// A keyed table of `(slug, value)` pairs.
///
/// `transact` is all-or-nothing: on `Err` the table is unchanged.
pub trait Table<K, V>: Send + Sync {
    /// Reads the current value without transactional isolation.
    fn dirty_read(&self, slug: &K) -> Option<StoredValue<V>>;

    /// Applies one mutation atomically.
    fn transact(&self, op: WriteOp<K, V>) -> Result<()>;

    /// Number of live records.
    fn len(&self) -> usize;

    /// Number of entries in the durable log, if any.
    fn log_len(&self) -> usize {
        0
    }

    /// Rewrites durable state as a snapshot of the live records.
    ///
    /// Returns the number of log entries discarded.
    fn compact(&self) -> Result<usize> {
        Ok(0)
    }
}

// == Memory Table ==
/// A table held only in process memory.
#[derive(Debug)]
pub struct MemoryTable<K, V> {
    records: RwLock<HashMap<K, StoredValue<V>>>,
}

impl<K: Slug, V: Content> Default for MemoryTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Slug, V: Content> MemoryTable<K, V> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a table pre-loaded with `records`.
    pub fn with_records(records: HashMap<K, StoredValue<V>>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Copies every live record out of the table.
    ///
    /// Fails if a writer panicked while holding the table, since the copy
    /// may then be incomplete.
    pub fn snapshot(&self) -> Result<Vec<(K, StoredValue<V>)>> {
        let records = self
            .records
            .read()
            .map_err(|_| ContentCacheError::Transaction("table lock poisoned".to_string()))?;

        Ok(records
            .iter()
            .map(|(slug, value)| (slug.clone(), value.clone()))
            .collect())
    }

    /// Panics a writer while it holds the table lock.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = self.records.write();
                    panic!("writer died holding the table");
                })
                .join();
        });
    }
}

impl<K: Slug, V: Content> Table<K, V> for MemoryTable<K, V> {
    fn dirty_read(&self, slug: &K) -> Option<StoredValue<V>> {
        // Reads see the last image even after a writer panicked
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(slug).cloned()
    }

    fn transact(&self, op: WriteOp<K, V>) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ContentCacheError::Transaction("table lock poisoned".to_string()))?;

        apply(&mut records, op);
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Applies a mutation to an in-memory image.
pub(crate) fn apply<K: Slug, V>(records: &mut HashMap<K, StoredValue<V>>, op: WriteOp<K, V>) {
    match op {
        WriteOp::Put { slug, value } => {
            records.insert(slug, value);
        }
        WriteOp::Delete { slug } => {
            records.remove(&slug);
        }
    }
}
