//! The remote tree store contract.
//!
//! The engine needs exactly five primitives from the hosted store: point
//! reads, point writes, multi-path merge updates, single-path atomic
//! transactions and push subscriptions. Values are JSON; `null` and absence
//! are the same thing.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::subscription::Subscription;

/// What a transaction closure decided for the value it was shown.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    /// Write this value (`None` deletes the node).
    Commit(Option<Value>),
    /// Leave the node untouched.
    Abort,
}

/// Transaction body. May run more than once if the store retries after a
/// concurrent write, so it must be free of side effects.
pub type TxFn = Box<dyn FnMut(Option<Value>) -> TxDecision + Send>;

#[derive(Debug, Clone, PartialEq)]
pub struct TxOutcome {
    pub committed: bool,
    /// Value at the path after the transaction.
    pub snapshot: Option<Value>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError>;

    /// Replace the node at `path`. Writing `Value::Null` deletes it.
    async fn set(&self, path: &str, value: Value) -> Result<(), RemoteError>;

    /// Apply several writes atomically. Keys of `changes` are paths relative
    /// to `path`; untouched siblings are preserved.
    async fn update(&self, path: &str, changes: Map<String, Value>) -> Result<(), RemoteError>;

    /// Atomic read-modify-write of a single node.
    async fn transaction(&self, path: &str, update: TxFn) -> Result<TxOutcome, RemoteError>;

    /// Current value of `path` now, then again after every change to it.
    async fn subscribe(&self, path: &str) -> Result<Subscription<Option<Value>>, RemoteError>;

    async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        self.set(path, Value::Null).await
    }
}
