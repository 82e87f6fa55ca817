use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity;
use crate::protocol::MessageRecord;

/// Opaque user identifier issued by the authentication layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical conversation key. Built with [`ConversationId::derive`]; the
/// raw constructor exists only for keys read back from storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn derive(a: &UserId, b: &UserId) -> Result<Self, ValidationError> {
        identity::conversation_id(a, b)
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// Message payload, resolved once when a record is ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Image { url: String },
}

/// A single chat message.
///
/// Serializes to the remote record shape, so cached copies and remote
/// copies share one format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "MessageRecord", try_from = "MessageRecord")]
pub struct Message {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub body: MessageBody,
    /// Sender wall-clock, Unix epoch millis.
    pub timestamp: i64,
    /// Flipped false -> true by the receiver, never back.
    pub read: bool,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self.body {
            MessageBody::Text(_) => MessageKind::Text,
            MessageBody::Image { .. } => MessageKind::Image,
        }
    }

    /// Display text. For images this is the attachment URL, which older
    /// clients render as a link.
    pub fn text(&self) -> &str {
        match &self.body {
            MessageBody::Text(text) => text,
            MessageBody::Image { url } => url,
        }
    }

    pub fn attachment_url(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(_) => None,
            MessageBody::Image { url } => Some(url),
        }
    }

    pub fn is_unread_for(&self, viewer: &UserId) -> bool {
        &self.receiver_id == viewer && !self.read
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub timestamp: i64,
    pub sender_id: UserId,
    /// Absent on summaries written by older clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Denormalized per-conversation metadata shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub unread_count: BTreeMap<UserId, u32>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ChatSummary {
    pub fn new(conversation_id: ConversationId, participants: Vec<UserId>, now_ms: i64) -> Self {
        Self {
            conversation_id,
            last_message: None,
            participants,
            unread_count: BTreeMap::new(),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// The key this summary belongs under, recomputed from the participants
    /// when both are known. Falls back to the stored ID otherwise.
    pub fn canonical_id(&self) -> ConversationId {
        if let [a, b] = self.participants.as_slice() {
            if let Ok(id) = identity::conversation_id(a, b) {
                return id;
            }
        }
        self.conversation_id.clone()
    }

    pub fn unread_for(&self, user: &UserId) -> u32 {
        self.unread_count.get(user).copied().unwrap_or(0)
    }

    /// Whether `message_id` is the message this summary last folded in.
    pub fn last_folded(&self, message_id: &str) -> bool {
        self.last_message
            .as_ref()
            .and_then(|last| last.message_id.as_deref())
            == Some(message_id)
    }

    /// Fold a newly sent message into the summary. A message older than the
    /// current `lastMessage` still counts as unread but does not replace it.
    pub fn record_message(&mut self, message: &Message) {
        let newer = self
            .last_message
            .as_ref()
            .map_or(true, |last| message.timestamp >= last.timestamp);
        if newer {
            self.last_message = Some(LastMessage {
                content: message.text().to_string(),
                timestamp: message.timestamp,
                sender_id: message.sender_id.clone(),
                message_id: Some(message.id.clone()),
            });
        }
        self.updated_at = self.updated_at.max(message.timestamp);
        for user in [&message.sender_id, &message.receiver_id] {
            if !self.participants.contains(user) {
                self.participants.push(user.clone());
            }
        }
        *self
            .unread_count
            .entry(message.receiver_id.clone())
            .or_insert(0) += 1;
    }
}
