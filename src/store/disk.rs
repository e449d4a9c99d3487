//! Disk Table Module
//!
//! A table whose durable state is an append-only JSON-lines log. The log is
//! replayed into memory on open; reads are served from memory and every
//! transaction is appended and synced before it becomes visible.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::error::{ContentCacheError, Result};
use crate::store::record::{Content, Slug, StoredValue};
use crate::store::table::{apply, MemoryTable, Table, WriteOp};

// == Log Writer ==
#[derive(Debug)]
struct LogWriter {
    file: File,
    entries: usize,
    /// Set when a failed append could not be rolled back
    broken: Option<String>,
}

impl LogWriter {
    fn new(file: File, entries: usize) -> Self {
        Self {
            file,
            entries,
            broken: None,
        }
    }

    /// Appends `op` and syncs it, returning the offset the entry starts at.
    ///
    /// On failure the log is cut back to that offset.
    fn append<K: Slug, V: Content>(&mut self, op: &WriteOp<K, V>) -> std::io::Result<u64> {
        let mut line = serde_json::to_vec(op)?;
        line.push(b'\n');

        let offset = self.file.metadata()?.len();
        let written = self.file.write_all(&line).and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            self.truncate(offset);
            return Err(e);
        }

        self.entries += 1;
        Ok(offset)
    }

    /// Removes the entry appended at `offset`.
    fn undo(&mut self, offset: u64) {
        self.entries -= 1;
        self.truncate(offset);
    }

    fn truncate(&mut self, offset: u64) {
        if let Err(e) = self.file.set_len(offset).and_then(|()| self.file.sync_data()) {
            error!("Cannot roll table log back to {} bytes: {}", offset, e);
            self.broken = Some(e.to_string());
        }
    }
}

// == Disk Table ==
/// A disk-resident table backed by `<dir>/<name>.log`.
#[derive(Debug)]
pub struct DiskTable<K, V> {
    path: PathBuf,
    image: MemoryTable<K, V>,
    log: Mutex<LogWriter>,
}

impl<K: Slug, V: Content> DiskTable<K, V> {
    // == Open ==
    /// Opens (or creates) the table `name` under `dir`, replaying its log.
    ///
    /// The directory is created if absent. A torn final line is dropped; any
    /// other unreadable line fails the open.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            ContentCacheError::StartupFailed(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(format!("{}.log", name));
        let replay = replay::<K, V>(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                ContentCacheError::StartupFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        if let Some(len) = replay.truncate_to {
            file.set_len(len).map_err(|e| {
                ContentCacheError::StartupFailed(format!(
                    "cannot truncate {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        info!(
            "Opened table log {} ({} records, {} log entries)",
            path.display(),
            replay.records.len(),
            replay.entries
        );

        Ok(Self {
            path,
            image: MemoryTable::with_records(replay.records),
            log: Mutex::new(LogWriter::new(file, replay.entries)),
        })
    }

    /// Location of the table log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_log(&self) -> Result<std::sync::MutexGuard<'_, LogWriter>> {
        self.log
            .lock()
            .map_err(|_| ContentCacheError::Transaction("table log lock poisoned".to_string()))
    }
}

impl<K: Slug, V: Content> Table<K, V> for DiskTable<K, V> {
    fn dirty_read(&self, slug: &K) -> Option<StoredValue<V>> {
        self.image.dirty_read(slug)
    }

    fn transact(&self, op: WriteOp<K, V>) -> Result<()> {
        let mut log = self.lock_log()?;

        if let Some(reason) = &log.broken {
            return Err(ContentCacheError::Transaction(format!(
                "{} is unusable after a failed rollback: {}",
                self.path.display(),
                reason
            )));
        }

        let offset = log.append(&op).map_err(|e| {
            ContentCacheError::Transaction(format!(
                "append to {} failed: {}",
                self.path.display(),
                e
            ))
        })?;

        // The log lock is held until the image matches the log.
        if let Err(e) = self.image.transact(op) {
            log.undo(offset);
            return Err(e);
        }

        Ok(())
    }

    fn len(&self) -> usize {
        self.image.len()
    }

    fn log_len(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).entries
    }

    fn compact(&self) -> Result<usize> {
        let mut log = self.lock_log()?;
        let live = self.image.snapshot()?;

        if log.broken.is_none() && log.entries <= live.len() {
            return Ok(0);
        }

        let tmp_path = self.path.with_extension("log.tmp");
        let rewrite = |tmp: &Path| -> std::io::Result<File> {
            let mut writer = BufWriter::new(File::create(tmp)?);
            for (slug, value) in &live {
                let op = WriteOp::Put {
                    slug: slug.clone(),
                    value: value.clone(),
                };
                serde_json::to_writer(&mut writer, &op)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;

            // The append handle follows the inode through the rename
            let file = OpenOptions::new().append(true).open(tmp)?;
            fs::rename(tmp, &self.path)?;
            Ok(file)
        };

        let file = rewrite(&tmp_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            ContentCacheError::Transaction(format!(
                "compaction of {} failed: {}",
                self.path.display(),
                e
            ))
        })?;

        let discarded = log.entries.saturating_sub(live.len());
        *log = LogWriter::new(file, live.len());
        debug!("Compacted {}: discarded {} entries", self.path.display(), discarded);

        Ok(discarded)
    }
}

// == Replay ==
/// Result of reading a table log back into memory.
struct Replay<K, V> {
    records: HashMap<K, StoredValue<V>>,
    entries: usize,
    /// Byte length of the committed prefix, if a torn tail follows it
    truncate_to: Option<u64>,
}

/// Rebuilds the in-memory image from the log at `path`.
///
/// Only newline-terminated entries are committed. An unterminated or
/// unparseable final entry is a torn write; anything unparseable before it
/// is corruption.
fn replay<K: Slug, V: Content>(path: &Path) -> Result<Replay<K, V>> {
    let mut replay = Replay {
        records: HashMap::new(),
        entries: 0,
        truncate_to: None,
    };

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(replay),
        Err(e) => {
            return Err(ContentCacheError::StartupFailed(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let lines: Vec<&str> = contents.split_inclusive('\n').collect();
    let mut committed = 0usize;

    for (number, line) in lines.iter().enumerate() {
        let is_last = number + 1 == lines.len();
        let parsed = if line.ends_with('\n') {
            let entry = line.trim();
            if entry.is_empty() {
                committed += line.len();
                continue;
            }
            serde_json::from_str::<WriteOp<K, V>>(entry).map_err(|e| e.to_string())
        } else {
            Err("unterminated entry".to_string())
        };

        match parsed {
            Ok(op) => {
                apply(&mut replay.records, op);
                replay.entries += 1;
                committed += line.len();
            }
            Err(reason) if is_last => {
                warn!(
                    "Dropping torn final entry of {} (line {}): {}",
                    path.display(),
                    number + 1,
                    reason
                );
                replay.truncate_to = Some(committed as u64);
            }
            Err(reason) => {
                return Err(ContentCacheError::StartupFailed(format!(
                    "corrupt entry at {}:{}: {}",
                    path.display(),
                    number + 1,
                    reason
                )))
            }
        }
    }

    Ok(replay)
}
