//! Namespaced TTL cache over [`LocalStorage`].
//!
//! Entries are stored as JSON `{data, timestamp}` under `"{namespace}:{key}"`.
//! Expiry is checked on read (lazy eviction); nothing sweeps in the
//! background.  Writes are last-writer-wins, no merging.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tandem_shared::constants::PROFILE_CACHE_TTL_MS;
use tandem_shared::SharedClock;

use crate::error::Result;
use crate::storage::LocalStorage;

/// A cache partition with its own expiry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheNamespace {
    name: &'static str,
    /// `None` means entries never expire by age; the caller decides
    /// freshness from the payload.
    ttl_ms: Option<i64>,
}

impl CacheNamespace {
    pub const PROFILES: Self = Self::new("profiles", Some(PROFILE_CACHE_TTL_MS));
    pub const FAVORITES: Self = Self::new("favorites", Some(PROFILE_CACHE_TTL_MS));
    /// Freshness is judged against the summary's own `updatedAt`.
    pub const CHAT_SUMMARIES: Self = Self::new("chat-summaries", None);
    pub const CONVERSATION_LISTS: Self = Self::new("conversation-lists", None);
    pub const MESSAGES: Self = Self::new("messages", None);
    pub const BALANCES: Self = Self::new("balances", None);

    pub const fn new(name: &'static str, ttl_ms: Option<i64>) -> Self {
        Self { name, ttl_ms }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl_ms(&self) -> Option<i64> {
        self.ttl_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, Unix epoch millis.
    pub timestamp: i64,
}

impl<T> CacheEntry<T> {
    /// Valid while `now - timestamp < ttl`.
    pub fn is_valid(&self, now_ms: i64, ttl_ms: Option<i64>) -> bool {
        match ttl_ms {
            Some(ttl) => now_ms - self.timestamp < ttl,
            None => true,
        }
    }
}

/// Process-wide cache handle. Create one and share it by `Arc`.
pub struct CacheService {
    storage: Arc<dyn LocalStorage>,
    clock: SharedClock,
}

impl CacheService {
    pub fn new(storage: Arc<dyn LocalStorage>, clock: SharedClock) -> Self {
        Self { storage, clock }
    }

    fn storage_key(namespace: CacheNamespace, key: &str) -> String {
        format!("{}:{}", namespace.name, key)
    }

    /// Cached value, or `None` on miss or expiry.
    pub fn get<T: DeserializeOwned>(&self, namespace: CacheNamespace, key: &str) -> Result<Option<T>> {
        Ok(self.get_entry(namespace, key)?.map(|entry| entry.data))
    }

    /// Like [`get`](Self::get) but keeps the write timestamp.
    pub fn get_entry<T: DeserializeOwned>(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<CacheEntry<T>>> {
        let storage_key = Self::storage_key(namespace, key);
        let Some(raw) = self.storage.get(&storage_key)? else {
            return Ok(None);
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Dropping unreadable cache entry");
                self.storage.remove(&storage_key)?;
                return Ok(None);
            }
        };

        if !entry.is_valid(self.clock.now_ms(), namespace.ttl_ms) {
            debug!(key = %storage_key, "Cache entry expired");
            self.storage.remove(&storage_key)?;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    pub fn set<T: Serialize>(&self, namespace: CacheNamespace, key: &str, data: &T) -> Result<()> {
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_ms(),
        };
        let raw = serde_json::to_string(&entry)?;
        self.storage.set(&Self::storage_key(namespace, key), &raw)
    }

    pub fn invalidate(&self, namespace: CacheNamespace, key: &str) -> Result<()> {
        self.storage.remove(&Self::storage_key(namespace, key))
    }

    pub fn invalidate_namespace(&self, namespace: CacheNamespace) -> Result<usize> {
        self.storage.remove_prefix(&format!("{}:", namespace.name))
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}
