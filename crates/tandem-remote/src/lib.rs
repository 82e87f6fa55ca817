//! Remote collaborators: the path-addressed tree store and blob storage.

pub mod blob;
pub mod error;
pub mod memory;
pub mod path;
pub mod subscription;
pub mod tree;

pub use blob::{BlobStorage, FsBlobStore};
pub use error::RemoteError;
pub use memory::{FaultOp, MemoryTree};
pub use subscription::Subscription;
pub use tree::{RemoteStore, TxDecision, TxFn, TxOutcome};
