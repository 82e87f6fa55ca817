//! Types, identifiers and crypto primitives shared by every Tandem crate.

pub mod clock;
pub mod constants;
pub mod error;
pub mod identity;
pub mod keys;
pub mod protocol;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{KeyError, RecordError, ValidationError};
pub use identity::conversation_id;
pub use types::{
    ChatSummary, ConversationId, LastMessage, Message, MessageBody, MessageKind, UserId,
};
