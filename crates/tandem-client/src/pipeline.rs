//! Outgoing message pipeline with credit gating.
//!
//! Each send walks `Composing -> Validating -> Persisting -> DebitingCredit
//! -> Settled`. The message is written before the balance is touched: once
//! persisted it stays persisted, and a failed debit only yields
//! [`SendOutcome::DebitFailed`]. The balance counter is the one value
//! updated through a transaction, clamped at zero.
//!
//! A new message record carries a `pending` flag until the summary and both
//! pointers reflect it. Resubmitting the same idempotency key while the flag
//! is set finishes the indexing and the debit instead of reporting a
//! duplicate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_remote::{BlobStorage, RemoteError, RemoteStore, TxDecision};
use tandem_shared::constants::CREDITS_PER_MESSAGE;
use tandem_shared::protocol::{ingest_message, ingest_summary, ConversationPointer};
use tandem_shared::{
    ChatSummary, ConversationId, Message, MessageBody, SharedClock, UserId, ValidationError,
};

use crate::balance::BalanceService;
use crate::error::SendError;
use crate::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    Composing,
    Validating,
    Persisting,
    DebitingCredit,
    Settled,
    /// Nothing was charged. The message record may already exist without
    /// its summary or pointers; resending the same key completes it.
    PersistFailed,
    /// The message was written; the sender was not charged.
    DebitFailed,
}

impl SendStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SendStage::Settled | SendStage::PersistFailed | SendStage::DebitFailed
        )
    }

    fn can_advance_to(self, next: SendStage) -> bool {
        use SendStage::*;
        matches!(
            (self, next),
            (Composing, Validating)
                | (Validating, Persisting)
                | (Persisting, DebitingCredit)
                | (Persisting, PersistFailed)
                // replay of an already persisted message
                | (Persisting, Settled)
                | (DebitingCredit, Settled)
                | (DebitingCredit, DebitFailed)
        )
    }
}

/// What the user composed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    Text(String),
    Image { file_name: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub sender: UserId,
    pub receiver: UserId,
    pub draft: Draft,
    /// Becomes the message ID. Resubmitting the same key never produces a
    /// second message or a second charge.
    pub idempotency_key: String,
}

impl SendRequest {
    pub fn text(sender: UserId, receiver: UserId, text: impl Into<String>) -> Self {
        Self::new(sender, receiver, Draft::Text(text.into()))
    }

    pub fn image(
        sender: UserId,
        receiver: UserId,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self::new(
            sender,
            receiver,
            Draft::Image {
                file_name: file_name.into(),
                bytes,
            },
        )
    }

    fn new(sender: UserId, receiver: UserId, draft: Draft) -> Self {
        Self {
            sender,
            receiver,
            draft,
            idempotency_key: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    Settled { message: Message, balance: i64 },
    /// Delivered but not billed. Show the message as sent plus a balance
    /// warning; never retract it.
    DebitFailed { message: Message, cause: RemoteError },
    /// A fully delivered message with this idempotency key already exists;
    /// nothing was written, uploaded or charged.
    Duplicate { message_id: String },
}

impl SendOutcome {
    pub fn stage(&self) -> SendStage {
        match self {
            SendOutcome::Settled { .. } | SendOutcome::Duplicate { .. } => SendStage::Settled,
            SendOutcome::DebitFailed { .. } => SendStage::DebitFailed,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            SendOutcome::Settled { message, .. } | SendOutcome::DebitFailed { message, .. } => {
                Some(message)
            }
            SendOutcome::Duplicate { .. } => None,
        }
    }
}

/// Logs every stage transition of one send.
struct SendTracker {
    message_id: String,
    conversation: ConversationId,
    stage: SendStage,
}

impl SendTracker {
    fn new(message_id: &str, conversation: &ConversationId) -> Self {
        Self {
            message_id: message_id.to_string(),
            conversation: conversation.clone(),
            stage: SendStage::Composing,
        }
    }

    fn advance(&mut self, next: SendStage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal send transition {:?} -> {:?}",
            self.stage,
            next
        );
        debug!(
            message_id = %self.message_id,
            conversation = %self.conversation,
            from = ?self.stage,
            to = ?next,
            "Send stage"
        );
        self.stage = next;
    }
}

/// Set on a message record until its summary and pointers are written.
const PENDING_FIELD: &str = "pending";

type InFlightKey = (UserId, ConversationId);

/// Held for the duration of one send; releases its slot on drop.
struct InFlightGuard<'a> {
    slots: &'a Mutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct MessagePipeline {
    remote: Arc<dyn RemoteStore>,
    blobs: Arc<dyn BlobStorage>,
    balances: BalanceService,
    clock: SharedClock,
    max_image_bytes: usize,
    in_flight: Mutex<HashSet<InFlightKey>>,
}

impl MessagePipeline {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        blobs: Arc<dyn BlobStorage>,
        balances: BalanceService,
        clock: SharedClock,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            remote,
            blobs,
            balances,
            clock,
            max_image_bytes,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome, SendError> {
        let conversation = ConversationId::derive(&request.sender, &request.receiver)?;
        let _slot = self.claim(&request.sender, &conversation)?;
        let mut tracker = SendTracker::new(&request.idempotency_key, &conversation);
        let cached = self.balances.cached(&request.sender);

        tracker.advance(SendStage::Validating);
        validate(&request.draft, self.max_image_bytes)?;
        self.ensure_funds(&request.sender, cached).await?;

        tracker.advance(SendStage::Persisting);
        let timestamp = self.clock.now_ms();
        let body = match request.draft {
            Draft::Text(text) => MessageBody::Text(text.trim().to_string()),
            Draft::Image { file_name, bytes } => {
                let upload = self
                    .upload(
                        &conversation,
                        &request.idempotency_key,
                        timestamp,
                        &file_name,
                        &bytes,
                    )
                    .await;
                match upload {
                    Ok(body) => body,
                    Err(e) => {
                        tracker.advance(SendStage::PersistFailed);
                        warn!(conversation = %conversation, error = %e, "Attachment upload failed");
                        return Err(e);
                    }
                }
            }
        };

        let message = Message {
            id: request.idempotency_key,
            sender_id: request.sender,
            receiver_id: request.receiver,
            body,
            timestamp,
            read: false,
        };

        let message_id = message.id.clone();
        let message = match self.persist(&conversation, message).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracker.advance(SendStage::Settled);
                info!(message_id = %message_id, conversation = %conversation, "Duplicate send ignored");
                return Ok(SendOutcome::Duplicate { message_id });
            }
            Err(e) => {
                tracker.advance(SendStage::PersistFailed);
                warn!(conversation = %conversation, error = %e, "Failed to persist message");
                return Err(SendError::PersistFailed(e));
            }
        };

        tracker.advance(SendStage::DebitingCredit);
        match self
            .balances
            .debit(&message.sender_id, CREDITS_PER_MESSAGE)
            .await
        {
            Ok(balance) => {
                tracker.advance(SendStage::Settled);
                info!(
                    message_id = %message.id,
                    conversation = %conversation,
                    kind = ?message.kind(),
                    balance,
                    "Message sent"
                );
                Ok(SendOutcome::Settled { message, balance })
            }
            Err(cause) => {
                tracker.advance(SendStage::DebitFailed);
                warn!(
                    message_id = %message.id,
                    sender = %message.sender_id,
                    error = %cause,
                    "Message persisted but credit debit failed"
                );
                Ok(SendOutcome::DebitFailed { message, cause })
            }
        }
    }

    /// Require a positive balance. A positive cached value is trusted; a
    /// missing or spent one is re-read, since the counter may have been
    /// topped up elsewhere.
    async fn ensure_funds(&self, sender: &UserId, cached: Option<i64>) -> Result<(), SendError> {
        let balance = match cached {
            Some(balance) if balance > 0 => balance,
            Some(balance) => match self.balances.refresh(sender).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    debug!(sender = %sender, error = %e, "Balance refresh failed, using cached value");
                    balance
                }
            },
            None => self
                .balances
                .refresh(sender)
                .await
                .map_err(SendError::BalanceUnavailable)?,
        };
        if balance <= 0 {
            info!(sender = %sender, balance, "Send blocked: insufficient balance");
            return Err(SendError::InsufficientBalance { balance });
        }
        Ok(())
    }

    /// Upload an attachment, unless a message with this ID already exists,
    /// in which case its stored body is reused.
    async fn upload(
        &self,
        conversation: &ConversationId,
        message_id: &str,
        timestamp: i64,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<MessageBody, SendError> {
        let stored = self
            .remote
            .get(&layout::message(conversation, message_id))
            .await
            .map_err(SendError::PersistFailed)?;
        if let Some(message) = stored.and_then(|value| ingest_message(message_id, &value).ok()) {
            debug!(message_id, conversation = %conversation, "Attachment already uploaded");
            return Ok(message.body);
        }

        let path = layout::image_blob(conversation, timestamp, file_name);
        let url = self
            .blobs
            .put(&path, bytes)
            .await
            .map_err(SendError::UploadFailed)?;
        Ok(MessageBody::Image { url })
    }

    fn claim(
        &self,
        sender: &UserId,
        conversation: &ConversationId,
    ) -> Result<InFlightGuard<'_>, SendError> {
        let key = (sender.clone(), conversation.clone());
        let mut slots = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !slots.insert(key.clone()) {
            return Err(SendError::InFlight {
                conversation_id: conversation.clone(),
            });
        }
        Ok(InFlightGuard {
            slots: &self.in_flight,
            key,
        })
    }

    /// Write the message if absent, then fold it into the summary and both
    /// participants' pointers. Returns the message to bill, or `None` when
    /// the ID was already fully delivered. A record left pending by an
    /// earlier attempt is indexed from its stored copy.
    async fn persist(
        &self,
        conversation: &ConversationId,
        message: Message,
    ) -> Result<Option<Message>, RemoteError> {
        let mut record = serde_json::to_value(&message)?;
        if let Value::Object(fields) = &mut record {
            fields.insert(PENDING_FIELD.to_string(), Value::Bool(true));
        }
        let claim = self
            .remote
            .transaction(
                &layout::message(conversation, &message.id),
                Box::new(move |current| match current {
                    Some(_) => TxDecision::Abort,
                    None => TxDecision::Commit(Some(record.clone())),
                }),
            )
            .await?;

        let message = if claim.committed {
            message
        } else {
            let Some(stored) = claim.snapshot.filter(|v| v.get(PENDING_FIELD).is_some()) else {
                return Ok(None);
            };
            match ingest_message(&message.id, &stored) {
                Ok(stored) => {
                    info!(message_id = %stored.id, conversation = %conversation, "Resuming unfinished send");
                    stored
                }
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "Pending message unreadable");
                    return Ok(None);
                }
            }
        };

        self.index(conversation, &message).await?;
        Ok(Some(message))
    }

    /// Fold `message` into the summary, then write both pointers and clear
    /// the pending flag in one update. The fold is skipped when the summary
    /// already ends with this message.
    async fn index(&self, conversation: &ConversationId, message: &Message) -> Result<(), RemoteError> {
        let key = conversation.clone();
        let folded = message.clone();
        let mut participants = vec![message.sender_id.clone(), message.receiver_id.clone()];
        participants.sort();
        let summary = self
            .remote
            .transaction(
                &layout::summary(conversation),
                Box::new(move |current| {
                    let mut summary = current
                        .and_then(|value| ingest_summary(key.as_str(), &value).ok())
                        .unwrap_or_else(|| {
                            ChatSummary::new(key.clone(), participants.clone(), folded.timestamp)
                        });
                    if summary.last_folded(&folded.id) {
                        return TxDecision::Abort;
                    }
                    summary.record_message(&folded);
                    match serde_json::to_value(&summary) {
                        Ok(value) => TxDecision::Commit(Some(value)),
                        Err(_) => TxDecision::Abort,
                    }
                }),
            )
            .await?;
        if !summary.committed {
            debug!(conversation = %conversation, message_id = %message.id, "Summary already current");
        }

        let pointer = serde_json::to_value(ConversationPointer::new(
            conversation.clone(),
            message.timestamp,
        ))?;
        let mut changes = Map::new();
        for user in [&message.sender_id, &message.receiver_id] {
            changes.insert(layout::pointer(user, conversation), pointer.clone());
        }
        changes.insert(
            format!("{}/{PENDING_FIELD}", layout::message(conversation, &message.id)),
            Value::Null,
        );
        self.remote.update("", changes).await
    }
}

fn validate(draft: &Draft, max_image_bytes: usize) -> Result<(), ValidationError> {
    match draft {
        Draft::Text(text) if text.trim().is_empty() => Err(ValidationError::EmptyMessage),
        Draft::Text(_) => Ok(()),
        Draft::Image { bytes, .. } if bytes.is_empty() => Err(ValidationError::EmptyAttachment),
        Draft::Image { bytes, .. } if bytes.len() > max_image_bytes => {
            Err(ValidationError::AttachmentTooLarge {
                size: bytes.len(),
                max: max_image_bytes,
            })
        }
        Draft::Image { .. } => Ok(()),
    }
}
