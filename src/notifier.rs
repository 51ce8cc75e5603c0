use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    TreeChanged,
    PromptChanged,
    NodeChanged,
    NoteChanged,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TreeChanged => "tree_changed",
            Self::PromptChanged => "prompt_changed",
            Self::NodeChanged => "node_changed",
            Self::NoteChanged => "note_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<i64>,
    pub message: String,
    pub timestamp: i64,
}

impl ChangeEvent {
    fn new(kind: ChangeKind, prompt_id: Option<i64>, message: String) -> Self {
        Self {
            kind,
            prompt_id,
            message,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn tree_changed() -> Self {
        Self::new(ChangeKind::TreeChanged, None, "Tree structure has been updated".to_string())
    }

    pub fn prompt_changed(prompt_id: i64) -> Self {
        Self::new(
            ChangeKind::PromptChanged,
            Some(prompt_id),
            format!("Prompt {} has been updated", prompt_id),
        )
    }

    pub fn node_changed(prompt_id: i64) -> Self {
        Self::new(
            ChangeKind::NodeChanged,
            Some(prompt_id),
            format!("Nodes for prompt {} have been updated", prompt_id),
        )
    }

    pub fn note_changed(prompt_id: i64) -> Self {
        Self::new(
            ChangeKind::NoteChanged,
            Some(prompt_id),
            format!("Notes for prompt {} have been updated", prompt_id),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberStatus {
    /// Receives every broadcast.
    Active,
    /// Queue overflowed; skipped by later broadcasts.
    Inactive,
    /// Unregistered, replaced, or the receiving side went away.
    Closed,
}

impl SubscriberStatus {
    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Inactive => 1,
            Self::Closed => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::Inactive,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug)]
struct StatusCell(AtomicU8);

impl StatusCell {
    fn new() -> Self {
        Self(AtomicU8::new(SubscriberStatus::Active.as_u8()))
    }

    fn get(&self) -> SubscriberStatus {
        SubscriberStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: SubscriberStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }

    /// Moves Active to `next`; false when the subscriber already left Active.
    fn leave_active(&self, next: SubscriberStatus) -> bool {
        self.0
            .compare_exchange(
                SubscriberStatus::Active.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[derive(Debug)]
struct SubscriberSlot {
    sender: mpsc::Sender<ChangeEvent>,
    status: Arc<StatusCell>,
    cancel: CancellationToken,
}

impl SubscriberSlot {
    fn close(&self) {
        self.status.set(SubscriberStatus::Closed);
        self.cancel.cancel();
    }
}

type Registry = RwLock<HashMap<String, SubscriberSlot>>;

/// Receiving half handed to a subscriber connection. Dropping it removes the
/// subscriber from the notifier.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    receiver: mpsc::Receiver<ChangeEvent>,
    status: Arc<StatusCell>,
    cancel: CancellationToken,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn status(&self) -> SubscriberStatus {
        self.status.get()
    }

    /// Next queued event. Returns `None` once the queue is closed, or once it is
    /// drained after the subscription was cancelled or fell behind.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        tokio::select! {
            biased;
            event = self.receiver.recv() => return event,
            _ = self.cancel.cancelled() => {}
        }
        self.receiver.try_recv().ok()
    }

    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut subscribers = registry.write().unwrap_or_else(PoisonError::into_inner);
        let owned = subscribers
            .get(&self.id)
            .map(|slot| Arc::ptr_eq(&slot.status, &self.status))
            .unwrap_or(false);
        if owned {
            if let Some(slot) = subscribers.remove(&self.id) {
                slot.close();
            }
        }
    }
}

/// In-process fan-out of change events to subscriber connections.
///
/// Each subscriber owns a bounded queue. Broadcasting never waits: a full queue
/// marks that subscriber inactive and the event is dropped for it alone.
#[derive(Debug, Clone)]
pub struct Notifier {
    subscribers: Arc<Registry>,
    capacity: usize,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn register(&self, id: impl Into<String>) -> Subscription {
        let id = id.into();
        let (sender, receiver) = mpsc::channel(self.capacity);
        let status = Arc::new(StatusCell::new());
        let cancel = CancellationToken::new();

        let slot = SubscriberSlot {
            sender,
            status: status.clone(),
            cancel: cancel.clone(),
        };

        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = subscribers.insert(id.clone(), slot) {
            previous.close();
            tracing::debug!(subscriber = %id, "replaced existing subscriber");
        }
        drop(subscribers);

        tracing::debug!(subscriber = %id, "subscriber registered");
        Subscription {
            id,
            receiver,
            status,
            cancel,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Removes the subscriber and closes its queue. Returns false for unknown ids.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(slot) => {
                slot.close();
                tracing::debug!(subscriber = %id, "subscriber unregistered");
                true
            }
            None => false,
        }
    }

    /// Offers the event to every active subscriber and returns how many accepted it.
    pub fn broadcast(&self, event: ChangeEvent) -> usize {
        let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0usize;
        for (id, slot) in subscribers.iter() {
            if slot.status.get() != SubscriberStatus::Active {
                continue;
            }
            match slot.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    if slot.status.leave_active(SubscriberStatus::Inactive) {
                        slot.cancel.cancel();
                        tracing::warn!(
                            subscriber = %id,
                            event = event.kind.as_str(),
                            "subscriber queue full; marking inactive"
                        );
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    slot.status.leave_active(SubscriberStatus::Closed);
                }
            }
        }
        delivered
    }

    pub fn broadcast_tree_changed(&self) -> usize {
        self.broadcast(ChangeEvent::tree_changed())
    }

    pub fn broadcast_prompt_changed(&self, prompt_id: i64) -> usize {
        self.broadcast(ChangeEvent::prompt_changed(prompt_id))
    }

    pub fn broadcast_node_changed(&self, prompt_id: i64) -> usize {
        self.broadcast(ChangeEvent::node_changed(prompt_id))
    }

    pub fn broadcast_note_changed(&self, prompt_id: i64) -> usize {
        self.broadcast(ChangeEvent::note_changed(prompt_id))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn active_subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.status.get() == SubscriberStatus::Active)
            .count()
    }

    /// Closes every subscriber; their streams end once drained.
    pub fn close_all(&self) -> usize {
        let drained = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect::<Vec<_>>();
        for (_, slot) in &drained {
            slot.close();
        }
        if !drained.is_empty() {
            tracing::info!(subscribers = drained.len(), "closed all subscribers");
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeEvent, ChangeKind, Notifier, SubscriberStatus};

    #[test]
    fn full_subscriber_goes_inactive_while_others_receive() {
        let notifier = Notifier::new(2);
        let mut slow = notifier.register("slow");
        notifier.broadcast_tree_changed();
        notifier.broadcast_tree_changed();

        let mut fast_a = notifier.register("fast-a");
        let mut fast_b = notifier.register("fast-b");

        let delivered = notifier.broadcast_prompt_changed(7);
        assert_eq!(delivered, 2);
        assert_eq!(slow.status(), SubscriberStatus::Inactive);
        assert_eq!(fast_a.status(), SubscriberStatus::Active);
        assert_eq!(notifier.active_subscriber_count(), 2);
        assert_eq!(notifier.subscriber_count(), 3);

        assert_eq!(fast_a.try_recv().expect("fast a").kind, ChangeKind::PromptChanged);
        assert_eq!(fast_b.try_recv().expect("fast b").prompt_id, Some(7));

        assert_eq!(slow.try_recv().expect("queued 1").kind, ChangeKind::TreeChanged);
        assert_eq!(slow.try_recv().expect("queued 2").kind, ChangeKind::TreeChanged);
        assert!(slow.try_recv().is_none());

        notifier.broadcast_note_changed(7);
        assert!(slow.try_recv().is_none());
        assert!(fast_a.try_recv().is_some());
    }

    #[tokio::test]
    async fn inactive_subscription_ends_after_draining() {
        let notifier = Notifier::new(1);
        let mut slow = notifier.register("slow");
        notifier.broadcast_node_changed(1);
        notifier.broadcast_node_changed(2);

        let first = slow.recv().await.expect("queued event");
        assert_eq!(first.prompt_id, Some(1));
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn unregister_closes_queue() {
        let notifier = Notifier::default();
        let mut subscription = notifier.register("client");
        assert!(notifier.unregister("client"));
        assert!(!notifier.unregister("client"));
        assert_eq!(subscription.status(), SubscriberStatus::Closed);
        assert!(subscription.recv().await.is_none());
        assert_eq!(notifier.broadcast_tree_changed(), 0);
    }

    #[test]
    fn reregistering_replaces_previous_subscription() {
        let notifier = Notifier::default();
        let old = notifier.register("same");
        let mut new = notifier.register("same");
        assert_eq!(old.status(), SubscriberStatus::Closed);
        assert!(old.cancel.is_cancelled());
        assert_eq!(notifier.subscriber_count(), 1);

        drop(old);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(notifier.broadcast_tree_changed(), 1);
        assert!(new.try_recv().is_some());
    }

    #[tokio::test]
    async fn close_all_ends_every_stream_after_draining() {
        let notifier = Notifier::new(4);
        let mut first = notifier.register("first");
        let mut second = notifier.register("second");
        notifier.broadcast_tree_changed();

        assert_eq!(notifier.close_all(), 2);
        assert_eq!(notifier.subscriber_count(), 0);
        assert_eq!(first.status(), SubscriberStatus::Closed);
        assert!(first.recv().await.is_some());
        assert!(first.recv().await.is_none());
        assert!(second.recv().await.is_some());
        assert!(second.recv().await.is_none());
    }

    #[test]
    fn dropping_subscription_unregisters_it() {
        let notifier = Notifier::default();
        let subscription = notifier.register("gone");
        assert_eq!(notifier.subscriber_count(), 1);
        drop(subscription);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn event_wire_format_matches_clients() {
        let value = serde_json::to_value(ChangeEvent::note_changed(3)).expect("serialize");
        assert_eq!(value["type"], "note_changed");
        assert_eq!(value["prompt_id"], 3);
        assert_eq!(value["message"], "Notes for prompt 3 have been updated");
        assert!(value["timestamp"].as_i64().expect("timestamp") > 0);

        let value = serde_json::to_value(ChangeEvent::tree_changed()).expect("serialize");
        assert!(value.get("prompt_id").is_none());
    }
}
