//! String key/value persistence used by the cache and the key lifecycle.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Durable local key/value storage. Implementations must be safe to share
/// across tasks; writes are last-writer-wins.
pub trait LocalStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn remove_prefix(&self, prefix: &str) -> Result<usize>;
}

impl LocalStorage for Mutex<Database> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.lock().map_err(|_| StoreError::LockPoisoned)?.kv_get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .kv_set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().map_err(|_| StoreError::LockPoisoned)?.kv_remove(key)?;
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        self.lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .kv_remove_prefix(prefix)
    }
}

/// Non-durable storage for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}
