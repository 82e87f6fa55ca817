use thiserror::Error;

use tandem_remote::RemoteError;
use tandem_shared::{ConversationId, KeyError, RecordError, ValidationError};
use tandem_store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Local storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Unreadable remote record: {0}")]
    Record(#[from] RecordError),

    #[error("No user is logged in")]
    NotLoggedIn,
}

/// Why an outgoing message did not reach the remote store.
///
/// A message that was persisted but not billed is not an error; see
/// [`SendOutcome::DebitFailed`](crate::pipeline::SendOutcome::DebitFailed).
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Insufficient balance ({balance} credits)")]
    InsufficientBalance { balance: i64 },

    #[error("A message to {conversation_id} is already being sent")]
    InFlight { conversation_id: ConversationId },

    #[error("Could not read balance: {0}")]
    BalanceUnavailable(RemoteError),

    #[error("Attachment upload failed: {0}")]
    UploadFailed(RemoteError),

    #[error("Failed to persist message: {0}")]
    PersistFailed(RemoteError),

    #[error("No user is logged in")]
    NotLoggedIn,
}

impl SendError {
    /// Whether the same request may be retried as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            SendError::BalanceUnavailable(e)
            | SendError::UploadFailed(e)
            | SendError::PersistFailed(e) => e.is_transient(),
            SendError::InFlight { .. } => true,
            SendError::Validation(_)
            | SendError::InsufficientBalance { .. }
            | SendError::NotLoggedIn => false,
        }
    }
}
