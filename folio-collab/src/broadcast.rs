//! Per-session event fan-out.
//!
//! Each session owns one tokio broadcast channel. Publishing never blocks and
//! never takes a lock: subscribers that fall more than `capacity` events
//! behind lose the oldest ones (`RecvError::Lagged`), which is acceptable for
//! viewers since every event is also reflected in session state.
//!
//! ```text
//! SessionManager ── publish() ──► EventChannel ──┬──► subscriber (websocket)
//!                                                ├──► subscriber (persistence)
//!                                                └──► subscriber (tests)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::events::SessionEvent;

/// Statistics for monitoring channel health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub events_published: u64,
    /// Events published while nobody was subscribed
    pub events_unobserved: u64,
    pub subscribers: usize,
}

/// Broadcast channel scoped to a single session.
pub struct EventChannel {
    sender: broadcast::Sender<Arc<SessionEvent>>,
    capacity: usize,
    published: AtomicU64,
    unobserved: AtomicU64,
}

impl EventChannel {
    /// `capacity` is how many events each subscriber may buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            published: AtomicU64::new(0),
            unobserved: AtomicU64::new(0),
        }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        log::debug!("event {} for session {}", event.name(), event.session_id());
        self.published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(Arc::new(event)) {
            Ok(count) => count,
            Err(_) => {
                self.unobserved.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            events_published: self.published.load(Ordering::Relaxed),
            events_unobserved: self.unobserved.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}
