//! Read receipts and the unread badge.
//!
//! The badge only looks at the most recently touched conversations and only
//! counts messages newer than the unread window. An unread message older
//! than the window still exists unread in the data; it just stops counting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use tandem_remote::{RemoteStore, Subscription};
use tandem_shared::protocol::{ingest_messages, recent_pointers};
use tandem_shared::{ConversationId, Message, SharedClock, UserId};

use crate::error::ClientError;
use crate::layout;

/// Unread messages addressed to `viewer` with `timestamp > now - window`.
pub fn count_unread(messages: &[Message], viewer: &UserId, now_ms: i64, window_ms: i64) -> u32 {
    let cutoff = now_ms - window_ms;
    messages
        .iter()
        .filter(|m| m.is_unread_for(viewer) && m.timestamp > cutoff)
        .count() as u32
}

#[derive(Clone)]
pub struct ReadReceipts {
    remote: Arc<dyn RemoteStore>,
    clock: SharedClock,
    recent_limit: usize,
    window_ms: i64,
    recount_every: Duration,
}

impl ReadReceipts {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        clock: SharedClock,
        recent_limit: usize,
        window_ms: i64,
        recount_every: Duration,
    ) -> Self {
        Self {
            remote,
            clock,
            recent_limit,
            window_ms,
            recount_every,
        }
    }

    /// Mark every loaded message addressed to `viewer` as read and zero the
    /// viewer's unread counter, in one batched write. Returns how many
    /// messages were flipped.
    pub async fn mark_as_read(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
        loaded: &[Message],
    ) -> Result<usize, ClientError> {
        let mut changes = Map::new();
        for message in loaded.iter().filter(|m| m.is_unread_for(viewer)) {
            changes.insert(
                format!("{}/read", layout::message(conversation, &message.id)),
                Value::Bool(true),
            );
        }
        let flipped = changes.len();
        if flipped == 0 {
            return Ok(0);
        }

        changes.insert(
            format!("{}/unreadCount/{viewer}", layout::summary(conversation)),
            Value::from(0),
        );
        self.remote.update("", changes).await?;

        debug!(conversation = %conversation, viewer = %viewer, flipped, "Marked messages read");
        Ok(flipped)
    }

    /// One-off unread total for `viewer`.
    pub async fn unread_count_once(&self, viewer: &UserId) -> Result<u32, ClientError> {
        let index = self.remote.get(&layout::pointers(viewer)).await?;
        let paths: Vec<String> = recent_pointers(index.as_ref(), self.recent_limit)
            .iter()
            .map(|p| layout::messages(&p.target()))
            .collect();

        let threads = join_all(paths.iter().map(|path| self.remote.get(path))).await;

        let now = self.clock.now_ms();
        let mut total = 0;
        for thread in threads {
            let (messages, _) = ingest_messages(thread?.as_ref());
            total += count_unread(&messages, viewer, now, self.window_ms);
        }
        Ok(total)
    }

    /// Live unread total for `viewer`. Re-emits when a tracked thread or the
    /// conversation index changes, and re-evaluates the window on a timer so
    /// messages age out without any remote activity. A thread that cannot be
    /// watched is left out of the total and retried on the next event.
    pub async fn unread_count(&self, viewer: &UserId) -> Result<Subscription<u32>, ClientError> {
        let index = self.remote.subscribe(&layout::pointers(viewer)).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let receipts = self.clone();
        let viewer = viewer.clone();
        let task = tokio::spawn(async move {
            receipts.run_badge(&viewer, index, tx).await;
            debug!(viewer = %viewer, "Unread badge feed closed");
        });

        Ok(Subscription::with_task(rx, task))
    }

    async fn run_badge(
        &self,
        viewer: &UserId,
        mut index: Subscription<Option<Value>>,
        tx: mpsc::UnboundedSender<u32>,
    ) {
        let mut threads = Threads::default();
        let mut last: Option<u32> = None;

        let mut ticker = tokio::time::interval(self.recount_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                node = index.next() => {
                    let Some(node) = node else { break };
                    let wanted: HashSet<ConversationId> = recent_pointers(node.as_ref(), self.recent_limit)
                        .iter()
                        .map(|p| p.target())
                        .collect();
                    if wanted != threads.tracked {
                        debug!(viewer = %viewer, tracked = wanted.len(), "Unread badge tracking changed");
                        threads.track(wanted);
                    }
                }
                Some((conversation, node)) = threads.feeds.next(), if !threads.feeds.is_empty() => {
                    let (messages, _) = ingest_messages(node.as_ref());
                    threads.messages.insert(conversation, messages);
                }
                _ = ticker.tick() => {}
            }

            self.attach_missing(&mut threads).await;

            let now = self.clock.now_ms();
            let total: u32 = threads
                .messages
                .values()
                .map(|messages| count_unread(messages, viewer, now, self.window_ms))
                .sum();
            if last != Some(total) {
                if tx.send(total).is_err() {
                    break;
                }
                last = Some(total);
            }
        }
    }

    /// Subscribe to every tracked thread that has no live feed yet, consuming
    /// its initial snapshot so the next count is complete.
    async fn attach_missing(&self, threads: &mut Threads) {
        let missing: Vec<ConversationId> = threads
            .tracked
            .difference(&threads.attached)
            .cloned()
            .collect();
        for conversation in missing {
            let mut sub = match self.remote.subscribe(&layout::messages(&conversation)).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(conversation = %conversation, error = %e, "Cannot watch thread, retrying later");
                    continue;
                }
            };
            if let Some(node) = sub.recv().await {
                threads
                    .messages
                    .insert(conversation.clone(), ingest_messages(node.as_ref()).0);
            }
            let key = conversation.clone();
            threads
                .feeds
                .push(sub.map(move |node| (key.clone(), node)).boxed());
            threads.attached.insert(conversation);
        }
    }
}

type ThreadFeed = BoxStream<'static, (ConversationId, Option<Value>)>;

/// Badge state: which threads should count, which have a live feed, and the
/// last snapshot of each.
#[derive(Default)]
struct Threads {
    tracked: HashSet<ConversationId>,
    attached: HashSet<ConversationId>,
    feeds: SelectAll<ThreadFeed>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

impl Threads {
    /// Switch to a new tracked set. Feeds are only torn down when a thread
    /// drops out; new threads are attached on top of the existing ones.
    fn track(&mut self, wanted: HashSet<ConversationId>) {
        if !self.tracked.is_subset(&wanted) {
            self.feeds = SelectAll::new();
            self.attached.clear();
            self.messages.retain(|conversation, _| wanted.contains(conversation));
        }
        self.tracked = wanted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_remote::{FaultOp, MemoryTree};
    use tandem_shared::{ManualClock, MessageBody};

    const NOW: i64 = 1_700_000_000_000;
    const HOUR: i64 = 60 * 60 * 1000;

    fn message(id: &str, receiver: &str, ts: i64, read: bool) -> Message {
        let sender = if receiver == "v" { "o" } else { "v" };
        Message {
            id: id.to_string(),
            sender_id: UserId::from(sender),
            receiver_id: UserId::from(receiver),
            body: MessageBody::Text("hey".into()),
            timestamp: ts,
            read,
        }
    }

    fn receipts(tree: Arc<MemoryTree>, clock: Arc<ManualClock>) -> ReadReceipts {
        ReadReceipts::new(tree, clock, 20, 24 * HOUR, Duration::from_millis(20))
    }

    async fn put(tree: &MemoryTree, cid: &str, m: &Message) {
        tree.set(
            &format!("messages/{cid}/{}", m.id),
            serde_json::to_value(m).unwrap(),
        )
        .await
        .unwrap();
    }

    async fn point(tree: &MemoryTree, user: &str, cid: &str, ts: i64) {
        tree.set(
            &format!("user_chats/{user}/{cid}"),
            serde_json::json!({"conversationId": cid, "updatedAt": ts}),
        )
        .await
        .unwrap();
    }

    async fn wait_for(sub: &mut Subscription<u32>, expected: u32) {
        let found = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(n) = sub.recv().await {
                if n == expected {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(found, Ok(true), "badge never reached {expected}");
    }

    #[test]
    fn test_count_unread_window() {
        let viewer = UserId::from("v");
        let messages = vec![
            message("old", "v", NOW - 25 * HOUR, false),
            message("recent", "v", NOW - HOUR, false),
            message("read", "v", NOW - HOUR, true),
            message("mine", "o", NOW - HOUR, false),
            message("edge", "v", NOW - 24 * HOUR, false),
        ];
        assert_eq!(count_unread(&messages, &viewer, NOW, 24 * HOUR), 1);
    }

    #[tokio::test]
    async fn test_mark_as_read_batches_only_unread_for_viewer() {
        let tree = Arc::new(MemoryTree::new());
        let receipts = receipts(tree.clone(), Arc::new(ManualClock::new(NOW)));
        let cid = ConversationId::from_raw("o_v");
        let loaded = vec![
            message("m1", "v", 1, false),
            message("m2", "v", 2, true),
            message("m3", "o", 3, false),
            message("m4", "v", 4, false),
        ];
        for m in &loaded {
            put(&tree, "o_v", m).await;
        }
        tree.set("chats/o_v/unreadCount/v", serde_json::json!(2)).await.unwrap();

        let mut watch = tree.subscribe("").await.unwrap();
        watch.recv().await;

        let flipped = receipts
            .mark_as_read(&cid, &UserId::from("v"), &loaded)
            .await
            .unwrap();
        assert_eq!(flipped, 2);

        // One notification for the whole batch.
        let snapshot = watch.recv().await.unwrap().unwrap();
        assert!(watch.try_recv().is_none());
        assert_eq!(snapshot["messages"]["o_v"]["m1"]["read"], true);
        assert_eq!(snapshot["messages"]["o_v"]["m4"]["read"], true);
        assert_eq!(snapshot["messages"]["o_v"]["m3"]["read"], false);
        assert_eq!(snapshot["chats"]["o_v"]["unreadCount"]["v"], 0);

        let again = receipts
            .mark_as_read(&cid, &UserId::from("v"), &[message("m2", "v", 2, true)])
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_unread_count_once() {
        let tree = Arc::new(MemoryTree::new());
        let receipts = receipts(tree.clone(), Arc::new(ManualClock::new(NOW)));
        point(&tree, "v", "o_v", NOW).await;
        point(&tree, "v", "p_v", NOW - 1).await;
        put(&tree, "o_v", &message("a", "v", NOW - HOUR, false)).await;
        put(&tree, "p_v", &message("b", "v", NOW - 2 * HOUR, false)).await;
        put(&tree, "p_v", &message("c", "v", NOW - 30 * HOUR, false)).await;

        assert_eq!(receipts.unread_count_once(&UserId::from("v")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_live_badge_follows_reads_and_new_messages() {
        let tree = Arc::new(MemoryTree::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let receipts = receipts(tree.clone(), clock.clone());
        let viewer = UserId::from("v");
        point(&tree, "v", "o_v", NOW).await;
        put(&tree, "o_v", &message("a", "v", NOW - HOUR, false)).await;

        let mut badge = receipts.unread_count(&viewer).await.unwrap();
        wait_for(&mut badge, 1).await;

        put(&tree, "o_v", &message("b", "v", NOW, false)).await;
        wait_for(&mut badge, 2).await;

        // A brand new conversation enters the index.
        point(&tree, "v", "p_v", NOW + 1).await;
        put(&tree, "p_v", &message("c", "v", NOW, false)).await;
        wait_for(&mut badge, 3).await;

        tree.set("messages/o_v/a/read", serde_json::json!(true)).await.unwrap();
        wait_for(&mut badge, 2).await;
    }

    #[tokio::test]
    async fn test_live_badge_ages_out_without_remote_change() {
        let tree = Arc::new(MemoryTree::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let receipts = receipts(tree.clone(), clock.clone());
        point(&tree, "v", "o_v", NOW).await;
        put(&tree, "o_v", &message("a", "v", NOW - 23 * HOUR, false)).await;

        let mut badge = receipts.unread_count(&UserId::from("v")).await.unwrap();
        wait_for(&mut badge, 1).await;

        clock.advance(Duration::from_secs(2 * 60 * 60));
        wait_for(&mut badge, 0).await;
    }

    #[tokio::test]
    async fn test_live_badge_survives_failed_thread_watch() {
        let tree = Arc::new(MemoryTree::new());
        let receipts = receipts(tree.clone(), Arc::new(ManualClock::new(NOW)));
        point(&tree, "v", "o_v", NOW).await;
        put(&tree, "o_v", &message("a", "v", NOW - HOUR, false)).await;

        let mut badge = receipts.unread_count(&UserId::from("v")).await.unwrap();
        wait_for(&mut badge, 1).await;

        tree.fail_next(FaultOp::Read, "messages", 1);
        put(&tree, "p_v", &message("b", "v", NOW, false)).await;
        point(&tree, "v", "p_v", NOW + 1).await;
        wait_for(&mut badge, 2).await;

        put(&tree, "o_v", &message("c", "v", NOW, false)).await;
        wait_for(&mut badge, 3).await;
    }

    #[tokio::test]
    async fn test_reordered_index_keeps_thread_feeds() {
        let tree = Arc::new(MemoryTree::new());
        let receipts = receipts(tree.clone(), Arc::new(ManualClock::new(NOW)));
        point(&tree, "v", "o_v", NOW).await;
        point(&tree, "v", "p_v", NOW - 1).await;
        put(&tree, "o_v", &message("a", "v", NOW - HOUR, false)).await;

        let mut badge = receipts.unread_count(&UserId::from("v")).await.unwrap();
        wait_for(&mut badge, 1).await;

        // Any re-subscription would trip this fault.
        tree.fail_next(FaultOp::Read, "messages", 1);
        point(&tree, "v", "p_v", NOW + 5).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(tree.get("messages/o_v").await.is_err());
        put(&tree, "o_v", &message("b", "v", NOW, false)).await;
        wait_for(&mut badge, 2).await;
    }
}
