//! Remote record shapes and ingestion.
//!
//! Records in the tree were written by several client generations: the body
//! may sit under `text`, `content` or `message`, and images may be flagged by
//! `kind`, `type`, `attachmentUrl` or `imageUrl`. Everything is resolved here
//! into [`Message`]; nothing downstream looks at the raw shape again.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;
use crate::types::{ChatSummary, ConversationId, Message, MessageBody, MessageKind, UserId};

/// Wire form of a message under `messages/{conversationId}/{messageId}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing)]
    pub content: Option<String>,
    #[serde(default, skip_serializing)]
    pub message: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub image_url: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl From<Message> for MessageRecord {
    fn from(m: Message) -> Self {
        let kind = m.kind();
        let (text, attachment_url) = match m.body {
            MessageBody::Text(text) => (text, None),
            MessageBody::Image { url } => (url.clone(), Some(url)),
        };
        Self {
            id: Some(m.id),
            sender_id: m.sender_id.as_str().to_string(),
            receiver_id: m.receiver_id.as_str().to_string(),
            text: Some(text),
            content: None,
            message: None,
            timestamp: m.timestamp,
            read: m.read,
            attachment_url,
            image_url: None,
            kind: Some(
                match kind {
                    MessageKind::Text => "text",
                    MessageKind::Image => "image",
                }
                .to_string(),
            ),
        }
    }
}

impl TryFrom<MessageRecord> for Message {
    type Error = RecordError;

    fn try_from(r: MessageRecord) -> Result<Self, Self::Error> {
        let key = r.id.clone().unwrap_or_default();
        let malformed = |reason: &str| RecordError::Malformed {
            key: key.clone(),
            reason: reason.to_string(),
        };

        let id = r.id.filter(|id| !id.is_empty()).ok_or_else(|| malformed("missing id"))?;
        if r.sender_id.is_empty() || r.receiver_id.is_empty() {
            return Err(malformed("missing participant"));
        }

        let text = r.text.or(r.content).or(r.message);
        let attachment = r.attachment_url.or(r.image_url);
        let is_image = match r.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("image") => true,
            Some(_) => false,
            None => attachment.is_some(),
        };

        let body = if is_image {
            let url = attachment.or(text).ok_or_else(|| malformed("image without url"))?;
            MessageBody::Image { url }
        } else {
            MessageBody::Text(text.ok_or_else(|| malformed("missing text"))?)
        };

        Ok(Message {
            id,
            sender_id: UserId::new(r.sender_id),
            receiver_id: UserId::new(r.receiver_id),
            body,
            timestamp: r.timestamp,
            read: r.read,
        })
    }
}

/// Resolve one child of a `messages/{conversationId}` node. The child key is
/// the message ID when the record does not carry one.
pub fn ingest_message(key: &str, value: &Value) -> Result<Message, RecordError> {
    let mut record: MessageRecord = serde_json::from_value(value.clone())?;
    if record.id.as_deref().map_or(true, str::is_empty) {
        record.id = Some(key.to_string());
    }
    Message::try_from(record)
}

/// Resolve every child of a message node, skipping records that cannot be
/// read. Returns the messages plus the keys that were skipped.
pub fn ingest_messages(node: Option<&Value>) -> (Vec<Message>, Vec<String>) {
    let mut messages = Vec::new();
    let mut skipped = Vec::new();
    let Some(Value::Object(children)) = node else {
        return (messages, skipped);
    };
    for (key, value) in children {
        match ingest_message(key, value) {
            Ok(m) => messages.push(m),
            Err(_) => skipped.push(key.clone()),
        }
    }
    (messages, skipped)
}

pub fn ingest_summary(key: &str, value: &Value) -> Result<ChatSummary, RecordError> {
    let mut value = value.clone();
    if let Value::Object(map) = &mut value {
        map.entry("conversationId")
            .or_insert_with(|| Value::String(key.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Entry under `user_chats/{userId}`: points at a conversation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPointer {
    /// Key of the pointer node. Older clients did not always use the
    /// canonical ID here.
    #[serde(skip)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub updated_at: i64,
}

impl ConversationPointer {
    pub fn new(conversation_id: ConversationId, updated_at: i64) -> Self {
        Self {
            key: conversation_id.as_str().to_string(),
            conversation_id: Some(conversation_id),
            updated_at,
        }
    }

    /// Summary key this pointer refers to.
    pub fn target(&self) -> ConversationId {
        self.conversation_id
            .clone()
            .unwrap_or_else(|| ConversationId::from_raw(self.key.clone()))
    }
}

/// Parse a user's pointer index and keep the `limit` most recently touched,
/// newest first. Pointers stored as a bare timestamp are accepted.
pub fn recent_pointers(node: Option<&Value>, limit: usize) -> Vec<ConversationPointer> {
    let Some(Value::Object(children)) = node else {
        return Vec::new();
    };

    let mut pointers: Vec<ConversationPointer> = children
        .iter()
        .filter_map(|(key, value)| {
            let mut pointer = match value {
                Value::Number(n) => ConversationPointer {
                    key: String::new(),
                    conversation_id: None,
                    updated_at: n.as_i64()?,
                },
                Value::Bool(true) => ConversationPointer {
                    key: String::new(),
                    conversation_id: None,
                    updated_at: 0,
                },
                other => serde_json::from_value(other.clone()).ok()?,
            };
            pointer.key = key.clone();
            Some(pointer)
        })
        .collect();

    pointers.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.key.cmp(&b.key)));
    pointers.truncate(limit);
    pointers
}
