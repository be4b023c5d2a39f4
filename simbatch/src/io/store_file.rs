//! Persisted result store: exclusive lock, load, merge and atomic replace.
//!
//! A merge pass runs inside a [`StoreSession`], which holds `<store>.lock`
//! for its whole lifetime so only one pass per store is in flight, even
//! across processes. The store file is only ever replaced by rename.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::core::store::{MergeSummary, ResultStore};
use crate::core::types::MetricRecord;
use crate::error::BatchError;
use crate::io::atomic::write_atomic;

/// Exclusive lock file, removed on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(store_path: &Path, lock_path: &Path) -> Result<Self, BatchError> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|source| BatchError::StoreWrite {
                path: store_path.to_path_buf(),
                source,
            })?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(lock_path)
                    .map(|contents| contents.trim().to_string())
                    .ok()
                    .filter(|contents| !contents.is_empty())
                    .unwrap_or_else(|| "another process".to_string());
                return Err(BatchError::StoreLocked {
                    path: store_path.to_path_buf(),
                    lock_path: lock_path.to_path_buf(),
                    holder,
                });
            }
            Err(source) => {
                return Err(BatchError::StoreWrite {
                    path: store_path.to_path_buf(),
                    source,
                });
            }
        };
        if let Err(err) = writeln!(file, "pid {}", std::process::id()) {
            warn!(lock = %lock_path.display(), err = %err, "failed to record pid in store lock");
        }
        debug!(lock = %lock_path.display(), "store lock acquired");
        Ok(Self {
            path: lock_path.to_path_buf(),
        })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), err = %err, "failed to remove store lock");
        }
    }
}

/// Load the store; a missing file is an empty store.
pub fn load_store(path: &Path) -> Result<ResultStore, BatchError> {
    let raw = read_store_text(path)?;
    parse_store(path, raw.as_deref().unwrap_or(""))
}

/// Raw store text, `None` when the file does not exist.
fn read_store_text(path: &Path) -> Result<Option<String>, BatchError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(BatchError::StoreRead {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

fn parse_store(path: &Path, contents: &str) -> Result<ResultStore, BatchError> {
    ResultStore::parse(contents).map_err(|err| BatchError::StoreRead {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Atomically replace the store file with the rendered store.
pub fn persist_store(path: &Path, store: &ResultStore) -> Result<(), BatchError> {
    write_atomic(path, store.render().as_bytes()).map_err(|source| BatchError::StoreWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// One locked merge pass over a persisted store.
#[derive(Debug)]
pub struct StoreSession {
    path: PathBuf,
    store: ResultStore,
    /// File content as loaded; `None` when the file did not exist.
    raw: Option<String>,
    _lock: StoreLock,
}

impl StoreSession {
    /// Take the lock, then load the current content.
    pub fn open(store_path: &Path, lock_path: &Path) -> Result<Self, BatchError> {
        let lock = StoreLock::acquire(store_path, lock_path)?;
        let raw = read_store_text(store_path)?;
        let store = parse_store(store_path, raw.as_deref().unwrap_or(""))?;
        debug!(entries = store.len(), existed = raw.is_some(), "store loaded");
        Ok(Self {
            path: store_path.to_path_buf(),
            store,
            raw,
            _lock: lock,
        })
    }

    /// Current content as loaded.
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Merge `records`, replace the file, and release the lock.
    ///
    /// The file is left alone only when it already holds the canonical
    /// rendering, so hand-edited stores are normalized by any merge.
    #[instrument(skip_all, fields(store = %self.path.display(), records = records.len()))]
    pub fn commit(mut self, records: &[MetricRecord]) -> Result<MergeSummary, BatchError> {
        let summary = self.store.merge(records);
        let rendered = self.store.render();
        if self.raw.as_deref() == Some(rendered.as_str()) {
            debug!("store unchanged");
            return Ok(summary);
        }
        persist_store(&self.path, &self.store)?;
        info!(
            inserted = summary.inserted,
            filled = summary.filled,
            kept = summary.kept,
            entries = self.store.len(),
            "store updated"
        );
        Ok(summary)
    }
}

/// Lock, load, merge and replace in one call.
pub fn merge_into_store(
    store_path: &Path,
    lock_path: &Path,
    records: &[MetricRecord],
) -> Result<MergeSummary, BatchError> {
    StoreSession::open(store_path, lock_path)?.commit(records)
}
