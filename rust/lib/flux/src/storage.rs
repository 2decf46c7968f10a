use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use redb::{Database, TableDefinition};

use crate::error::StorageError;

const TABLE: TableDefinition<&str, &str> = TableDefinition::new("flux_storage");

/// Synchronous key-value storage the store persists snapshots into.
///
/// Mirrors the browser `localStorage` surface: string keys, string values,
/// and every call may fail (quota exceeded, storage disabled, I/O error).
pub trait Storage: Send + Sync {
    /// Get the value for a key. Returns None if the key does not exist.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Set a key-value pair, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key. Deleting a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage. Lost when dropped.
///
/// Writes can be switched to fail with `QuotaExceeded`, and reads with
/// `Unavailable`, to exercise the store's fallbacks.
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-populated with one item.
    pub fn with_item(key: &str, value: &str) -> Self {
        let storage = Self::new();
        storage
            .items
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        storage
    }

    /// Make every subsequent `set_item` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent `get_item` fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable(format!("read of {key} denied")));
        }
        Ok(self.items.read().unwrap().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::QuotaExceeded(key.to_string()));
        }
        self.items
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().unwrap().remove(key);
        Ok(())
    }
}

/// Durable storage backed by redb, for native embeddings that want state to
/// survive restarts the way `localStorage` survives page loads.
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(|e| StorageError::Unavailable(e.to_string()))?;

        // A fresh file has no table yet; create it so the first read succeeds.
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(TABLE).map_err(backend)?;
        txn.commit().map_err(backend)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert `value` under `key`, or remove `key` when `value` is `None`,
    /// in one committed transaction.
    fn write(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(TABLE).map_err(backend)?;
            match value {
                Some(value) => {
                    table.insert(key, value).map_err(backend)?;
                }
                None => {
                    table.remove(key).map_err(backend)?;
                }
            }
        }
        txn.commit().map_err(backend)
    }
}

impl Storage for RedbStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        let value = table
            .get(key)
            .map_err(backend)?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write(key, Some(value))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.write(key, None)
    }
}

fn backend(e: impl Display) -> StorageError {
    StorageError::Backend(e.to_string())
}
