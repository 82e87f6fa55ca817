use thiserror::Error;

/// Input rejected before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Participant ID must not be empty")]
    EmptyParticipant,

    #[error("Cannot open a conversation with yourself")]
    SelfConversation,

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Attachment is empty")]
    EmptyAttachment,

    #[error("Attachment too large: {size} bytes (max {max})")]
    AttachmentTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Failed to generate keypair: {0}")]
    Generation(String),

    #[error("Failed to export key: {0}")]
    Export(String),

    #[error("Failed to import key: {0}")]
    Import(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Plaintext too long for RSA-OAEP: {len} bytes (max {max})")]
    PlaintextTooLong { len: usize, max: usize },

    #[error("Decryption failed: {cause}")]
    Decryption { cause: String },
}

/// A remote record that could not be resolved into a domain type.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Malformed record '{key}': {reason}")]
    Malformed { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
