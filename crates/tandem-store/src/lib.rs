//! # tandem-store
//!
//! Local durable storage for the Tandem chat engine.
//!
//! The crate exposes a synchronous `Database` handle wrapping a
//! `rusqlite::Connection` with a single string key/value table, the
//! [`LocalStorage`] trait the rest of the engine writes through, and the
//! namespaced TTL [`CacheService`] layered on top of it.  Because the cache
//! lives in the same file it survives restarts and doubles as an offline
//! hint.

pub mod cache;
pub mod database;
pub mod kv;
pub mod migrations;
pub mod storage;

mod error;

pub use cache::{CacheEntry, CacheNamespace, CacheService};
pub use database::Database;
pub use error::{Result, StoreError};
pub use storage::{LocalStorage, MemoryStorage};
