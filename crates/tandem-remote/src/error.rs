use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid path '{0}'")]
    InvalidPath(String),

    /// Network loss or a rejected request. Never retried here.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Blob too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    #[error("Blob storage error: {0}")]
    BlobStorage(String),
}

impl RemoteError {
    /// Whether the caller may reasonably try the same request again.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::BlobStorage(_))
    }
}
