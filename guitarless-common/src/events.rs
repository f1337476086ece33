//! Progress events and the broadcaster that fans them out
//!
//! Any component may publish a human-readable progress line; every
//! subscriber registered at publish time receives it, in publish order.
//! A subscriber retires itself after it has delivered one terminal line
//! (a message starting with "done" or "error", case-insensitive).
//!
//! The broadcaster is not partitioned by job: every subscriber sees every
//! line from every job. This is only coherent while one job runs at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Severity derived from the lexical prefix of a progress line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Informational stage update
    Info,
    /// Job finished successfully (terminal)
    Done,
    /// Job failed (terminal)
    Error,
}

impl Severity {
    /// Classify a message by its prefix
    pub fn of(message: &str) -> Self {
        let lowered = message.trim_start().to_lowercase();
        if lowered.starts_with("done") {
            Severity::Done
        } else if lowered.starts_with("error") {
            Severity::Error
        } else {
            Severity::Info
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Severity::Done | Severity::Error)
    }
}

/// One published progress line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Process-wide publish order
    pub sequence: u64,
    /// Human-readable text
    pub message: String,
    /// When the line was published
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn severity(&self) -> Severity {
        Severity::of(&self.message)
    }

    pub fn is_terminal(&self) -> bool {
        self.severity().is_terminal()
    }
}

/// Opaque subscriber identifier
pub type SubscriberId = u64;

struct Registry {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<ProgressEvent>>>,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::UnboundedSender<ProgressEvent>>> {
        // The map is always left consistent, so a poisoned lock is still usable
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: SubscriberId) -> bool {
        self.lock().remove(&id).is_some()
    }
}

/// Publish/subscribe hub for progress lines
///
/// Cheap to clone; all clones share one subscriber registry. Owned by the
/// serving process and handed to whatever needs to publish or subscribe.
///
/// # Examples
///
/// ```
/// use guitarless_common::events::Broadcaster;
///
/// let broadcaster = Broadcaster::new();
/// let mut subscriber = broadcaster.subscribe();
///
/// broadcaster.publish("Downloading...");
/// let event = subscriber.try_recv().expect("event should be queued");
/// assert_eq!(event.message, "Downloading...");
/// ```
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                next_sequence: AtomicU64::new(1),
            }),
        }
    }

    /// Register a new subscriber
    ///
    /// The subscriber receives every line published after this call.
    pub fn subscribe(&self) -> Subscriber {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().insert(id, tx);
        debug!(subscriber_id = id, "Progress subscriber registered");

        Subscriber {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
            retired: false,
        }
    }

    /// Deliver `message` to every registered subscriber
    ///
    /// Never fails. A subscriber whose receiving side is gone is logged and
    /// pruned; delivery to the others continues. Returns the number of
    /// subscribers the line was handed to.
    pub fn publish(&self, message: impl Into<String>) -> usize {
        let message = message.into();
        let mut subscribers = self.registry.lock();

        // Sequence is taken under the lock so all subscribers agree on order
        let event = ProgressEvent {
            sequence: self.registry.next_sequence.fetch_add(1, Ordering::Relaxed),
            message,
            timestamp: Utc::now(),
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in subscribers.iter() {
            match tx.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    debug!(subscriber_id = *id, "Progress delivery failed, dropping subscriber");
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            subscribers.remove(&id);
        }

        trace!(
            sequence = event.sequence,
            delivered,
            "Published progress: {}",
            event.message
        );
        delivered
    }

    /// Remove a subscriber from the registry; no-op if already removed
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.registry.remove(id) {
            debug!(subscriber_id = id, "Progress subscriber unregistered");
        }
    }

    /// Get the current number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Receiving side of one progress subscription
///
/// Unregisters itself after delivering a terminal line, or when dropped.
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    registry: Weak<Registry>,
    retired: bool,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether this subscription has ended
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Wait for the next line
    ///
    /// Returns `None` once the subscription has retired (after a terminal
    /// line) or the broadcaster has been dropped.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if self.retired {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => Some(self.deliver(event)),
            None => {
                self.retire();
                None
            }
        }
    }

    /// Take the next queued line without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        if self.retired {
            return None;
        }
        self.rx.try_recv().ok().map(|event| self.deliver(event))
    }

    fn deliver(&mut self, event: ProgressEvent) -> ProgressEvent {
        if event.is_terminal() {
            self.retire();
        }
        event
    }

    fn retire(&mut self) {
        if self.retired {
            return;
        }
        self.retired = true;
        self.rx.close();
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                debug!(subscriber_id = self.id, "Progress subscriber retired");
            }
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.retire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_prefixes() {
        assert_eq!(Severity::of("Done"), Severity::Done);
        assert_eq!(Severity::of("done: 2 files"), Severity::Done);
        assert_eq!(Severity::of("DONE"), Severity::Done);
        assert_eq!(Severity::of("Error: boom"), Severity::Error);
        assert_eq!(Severity::of("error"), Severity::Error);
        assert_eq!(Severity::of("Downloading..."), Severity::Info);
        assert_eq!(Severity::of("Isolating..."), Severity::Info);
        assert_eq!(Severity::of(""), Severity::Info);
        assert!(!Severity::Info.is_terminal());
        assert!(Severity::Done.is_terminal());
        assert!(Severity::Error.is_terminal());
    }

    #[test]
    fn test_subscribe_registers() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);

        let _a = broadcaster.subscribe();
        let _b = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);
    }

    #[test]
    fn test_only_messages_after_subscribe_are_received() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish("before");

        let mut subscriber = broadcaster.subscribe();
        broadcaster.publish("first");
        broadcaster.publish("second");

        assert_eq!(subscriber.try_recv().map(|e| e.message), Some("first".to_string()));
        assert_eq!(subscriber.try_recv().map(|e| e.message), Some("second".to_string()));
        assert!(subscriber.try_recv().is_none());
    }

    #[test]
    fn test_sequence_is_increasing() {
        let broadcaster = Broadcaster::new();
        let mut subscriber = broadcaster.subscribe();
        for i in 0..5 {
            broadcaster.publish(format!("step {}", i));
        }

        let mut last = 0;
        while let Some(event) = subscriber.try_recv() {
            assert!(event.sequence > last);
            last = event.sequence;
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn test_terminal_message_retires_subscriber() {
        let broadcaster = Broadcaster::new();
        let mut subscriber = broadcaster.subscribe();

        broadcaster.publish("Isolating...");
        broadcaster.publish("Done");

        assert_eq!(subscriber.try_recv().unwrap().message, "Isolating...");
        let terminal = subscriber.try_recv().unwrap();
        assert_eq!(terminal.severity(), Severity::Done);
        assert!(subscriber.is_retired());
        assert_eq!(broadcaster.subscriber_count(), 0);

        // A later publish never reaches the retired subscriber
        assert_eq!(broadcaster.publish("Error: late"), 0);
        assert!(subscriber.try_recv().is_none());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let broadcaster = Broadcaster::new();
        let subscriber = broadcaster.subscribe();
        let id = subscriber.id();

        broadcaster.unsubscribe(id);
        broadcaster.unsubscribe(id);
        assert_eq!(broadcaster.subscriber_count(), 0);

        drop(subscriber);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_drop_unregisters() {
        let broadcaster = Broadcaster::new();
        let subscriber = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(subscriber);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.publish("Downloading..."), 0);
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_terminal() {
        let broadcaster = Broadcaster::new();
        let mut subscriber = broadcaster.subscribe();

        broadcaster.publish("Error: fetch failed");
        broadcaster.publish("Downloading...");

        let event = subscriber.recv().await.expect("terminal event");
        assert_eq!(event.severity(), Severity::Error);
        assert!(subscriber.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_ends_when_broadcaster_dropped() {
        let broadcaster = Broadcaster::new();
        let mut subscriber = broadcaster.subscribe();
        drop(broadcaster);

        assert!(subscriber.recv().await.is_none());
        assert!(subscriber.is_retired());
    }
}
