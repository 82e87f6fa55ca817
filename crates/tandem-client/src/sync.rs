//! Cache-first live feeds for conversation lists and message threads.
//!
//! Every subscription first replays whatever the cache holds, then attaches
//! to the remote tree and re-emits only when the reconciled result actually
//! changes. Each feed runs in its own task that dies with its
//! [`Subscription`]; the engine keeps no state of its own between
//! subscribers.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tandem_remote::{RemoteStore, Subscription};
use tandem_shared::constants::SUMMARY_FRESHNESS_MS;
use tandem_shared::protocol::{ingest_messages, ingest_summary, recent_pointers, ConversationPointer};
use tandem_shared::{ChatSummary, ConversationId, Message, UserId};
use tandem_store::{CacheNamespace, CacheService};

use crate::error::ClientError;
use crate::layout;

#[derive(Clone)]
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<CacheService>,
    recent_limit: usize,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: Arc<CacheService>, recent_limit: usize) -> Self {
        Self {
            remote,
            cache,
            recent_limit,
        }
    }

    /// Live list of the user's most recently touched conversations, newest
    /// first. Conversations beyond the recency bound are not tracked until
    /// they are touched again.
    pub async fn subscribe_conversation_list(
        &self,
        user: &UserId,
    ) -> Result<Subscription<Vec<ChatSummary>>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let cached: Option<Vec<ChatSummary>> =
            self.cached(CacheNamespace::CONVERSATION_LISTS, user.as_str());
        if let Some(list) = &cached {
            debug!(user = %user, count = list.len(), "Serving cached conversation list");
            let _ = tx.send(list.clone());
        }

        let index = self.remote.subscribe(&layout::pointers(user)).await?;

        let engine = self.clone();
        let user = user.clone();
        let task = tokio::spawn(async move {
            engine.run_list(&user, index, tx, cached).await;
            debug!(user = %user, "Conversation list feed closed");
        });

        Ok(Subscription::with_task(rx, task))
    }

    /// Drive one conversation list: re-resolve on index changes and fold in
    /// live summary changes (read receipts, renames) of tracked conversations.
    async fn run_list(
        &self,
        user: &UserId,
        mut index: Subscription<Option<Value>>,
        tx: mpsc::UnboundedSender<Vec<ChatSummary>>,
        mut last: Option<Vec<ChatSummary>>,
    ) {
        let mut pointers: Vec<ConversationPointer> = Vec::new();
        let mut summaries: HashMap<ConversationId, ChatSummary> = HashMap::new();
        let mut watched: HashSet<ConversationId> = HashSet::new();
        let mut feeds: SelectAll<SummaryFeed> = SelectAll::new();

        loop {
            tokio::select! {
                node = index.next() => {
                    let Some(node) = node else { break };
                    pointers = recent_pointers(node.as_ref(), self.recent_limit);
                    let resolved = join_all(pointers.iter().map(|p| self.resolve_summary(p))).await;
                    summaries = pointers
                        .iter()
                        .zip(resolved)
                        .filter_map(|(pointer, summary)| Some((pointer.target(), summary?)))
                        .collect();

                    let wanted: HashSet<ConversationId> = pointers.iter().map(|p| p.target()).collect();
                    if wanted != watched {
                        (feeds, watched) = self.watch_summaries(&wanted).await;
                    }
                }
                Some((target, node)) = feeds.next(), if !feeds.is_empty() => {
                    match node.as_ref().map(|value| ingest_summary(target.as_str(), value)) {
                        Some(Ok(summary)) => {
                            self.store(CacheNamespace::CHAT_SUMMARIES, summary.canonical_id().as_str(), &summary);
                            summaries.insert(target, summary);
                        }
                        Some(Err(e)) => warn!(conversation = %target, error = %e, "Ignoring unreadable summary"),
                        None => {
                            summaries.remove(&target);
                        }
                    }
                }
            }

            let list = assemble_list(&pointers, &summaries);
            if last.as_ref() == Some(&list) {
                continue;
            }
            self.store(CacheNamespace::CONVERSATION_LISTS, user.as_str(), &list);
            if tx.send(list.clone()).is_err() {
                break;
            }
            last = Some(list);
        }
    }

    /// Watch the summary node of each conversation. Returns the feeds and
    /// the conversations actually being watched; a failed watch is retried
    /// on the next index change.
    async fn watch_summaries(
        &self,
        conversations: &HashSet<ConversationId>,
    ) -> (SelectAll<SummaryFeed>, HashSet<ConversationId>) {
        let mut feeds = SelectAll::new();
        let mut watched = HashSet::with_capacity(conversations.len());
        for conversation in conversations {
            match self.remote.subscribe(&layout::summary(conversation)).await {
                Ok(sub) => {
                    let key = conversation.clone();
                    feeds.push(sub.map(move |node| (key.clone(), node)).boxed());
                    watched.insert(conversation.clone());
                }
                Err(e) => {
                    warn!(conversation = %conversation, error = %e, "Cannot watch summary");
                }
            }
        }
        (feeds, watched)
    }

    /// Live message thread, ascending by timestamp.
    pub async fn subscribe_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Subscription<Vec<Message>>, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let cached: Option<Vec<Message>> =
            self.cached(CacheNamespace::MESSAGES, conversation.as_str());
        if let Some(messages) = &cached {
            debug!(conversation = %conversation, count = messages.len(), "Serving cached messages");
            let _ = tx.send(messages.clone());
        }

        let mut feed = self.remote.subscribe(&layout::messages(conversation)).await?;

        let engine = self.clone();
        let conversation = conversation.clone();
        let task = tokio::spawn(async move {
            // Without a cached copy the first remote snapshot is delivered
            // even if empty, so consumers can leave their loading state.
            let mut delivered = cached.is_some();
            let mut last = cached.unwrap_or_default();
            while let Some(node) = feed.next().await {
                let (incoming, skipped) = ingest_messages(node.as_ref());
                if !skipped.is_empty() {
                    warn!(conversation = %conversation, ?skipped, "Skipping unreadable messages");
                }
                let messages = reconcile_messages(incoming, &last);
                if delivered && messages == last {
                    continue;
                }
                delivered = true;
                engine.store(CacheNamespace::MESSAGES, conversation.as_str(), &messages);
                if tx.send(messages.clone()).is_err() {
                    break;
                }
                last = messages;
            }
            debug!(conversation = %conversation, "Message feed closed");
        });

        Ok(Subscription::with_task(rx, task))
    }

    /// Delete a conversation everywhere: messages, summary, both users'
    /// pointers and every cached copy.
    pub async fn purge_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<ConversationId, ClientError> {
        let conversation = ConversationId::derive(a, b)?;

        let mut changes = Map::new();
        for path in [
            layout::messages(&conversation),
            layout::summary(&conversation),
            layout::pointer(a, &conversation),
            layout::pointer(b, &conversation),
        ] {
            changes.insert(path, Value::Null);
        }
        self.remote.update("", changes).await?;

        self.cache
            .invalidate(CacheNamespace::MESSAGES, conversation.as_str())?;
        self.cache
            .invalidate(CacheNamespace::CHAT_SUMMARIES, conversation.as_str())?;
        for user in [a, b] {
            self.cache
                .invalidate(CacheNamespace::CONVERSATION_LISTS, user.as_str())?;
        }

        debug!(conversation = %conversation, "Purged conversation");
        Ok(conversation)
    }

    /// Summary a pointer refers to. A cached copy is reused only while it is
    /// less than five minutes old by its own `updatedAt` and not older than
    /// the pointer.
    async fn resolve_summary(&self, pointer: &ConversationPointer) -> Option<ChatSummary> {
        let target = pointer.target();
        let cached: Option<ChatSummary> =
            self.cached(CacheNamespace::CHAT_SUMMARIES, target.as_str());

        if let Some(summary) = &cached {
            let age = self.cache.now_ms() - summary.updated_at;
            if age < SUMMARY_FRESHNESS_MS && summary.updated_at >= pointer.updated_at {
                debug!(conversation = %target, "Summary cache hit");
                return cached;
            }
        }

        match self.remote.get(&layout::summary(&target)).await {
            Ok(Some(value)) => match ingest_summary(target.as_str(), &value) {
                Ok(summary) => {
                    self.store(
                        CacheNamespace::CHAT_SUMMARIES,
                        summary.canonical_id().as_str(),
                        &summary,
                    );
                    Some(summary)
                }
                Err(e) => {
                    warn!(conversation = %target, error = %e, "Ignoring unreadable summary");
                    cached
                }
            },
            Ok(None) => {
                debug!(key = %pointer.key, "Pointer without summary");
                None
            }
            Err(e) => {
                warn!(conversation = %target, error = %e, "Summary fetch failed, using cached copy");
                cached
            }
        }
    }

    fn cached<T: DeserializeOwned>(&self, namespace: CacheNamespace, key: &str) -> Option<T> {
        self.cache.get(namespace, key).unwrap_or_else(|e| {
            warn!(namespace = namespace.name(), key, error = %e, "Cache read failed");
            None
        })
    }

    fn store<T: Serialize>(&self, namespace: CacheNamespace, key: &str, data: &T) {
        if let Err(e) = self.cache.set(namespace, key, data) {
            warn!(namespace = namespace.name(), key, error = %e, "Cache write failed");
        }
    }
}

type SummaryFeed = BoxStream<'static, (ConversationId, Option<Value>)>;

/// Order resolved summaries by pointer recency, re-keyed under their
/// canonical IDs. When two pointers resolve to the same conversation the
/// first one wins. Newest first.
fn assemble_list(
    pointers: &[ConversationPointer],
    summaries: &HashMap<ConversationId, ChatSummary>,
) -> Vec<ChatSummary> {
    let mut seen = HashSet::new();
    let mut list = Vec::with_capacity(pointers.len());
    for pointer in pointers {
        let Some(summary) = summaries.get(&pointer.target()) else {
            continue;
        };
        let canonical = summary.canonical_id();
        if !seen.insert(canonical.clone()) {
            debug!(key = %pointer.key, conversation = %canonical, "Dropping duplicate pointer");
            continue;
        }
        let mut summary = summary.clone();
        summary.conversation_id = canonical;
        list.push(summary);
    }

    list.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    list
}

/// Deduplicate by ID (first seen wins), keep any message already seen as
/// read marked read, and sort ascending by timestamp then ID.
pub fn reconcile_messages(incoming: Vec<Message>, previous: &[Message]) -> Vec<Message> {
    let already_read: HashSet<&str> = previous
        .iter()
        .filter(|m| m.read)
        .map(|m| m.id.as_str())
        .collect();

    let mut by_id: HashMap<String, Message> = HashMap::with_capacity(incoming.len());
    for mut message in incoming {
        if already_read.contains(message.id.as_str()) {
            message.read = true;
        }
        match by_id.entry(message.id.clone()) {
            Entry::Occupied(mut existing) => existing.get_mut().read |= message.read,
            Entry::Vacant(slot) => {
                slot.insert(message);
            }
        }
    }

    let mut messages: Vec<Message> = by_id.into_values().collect();
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    messages
}
