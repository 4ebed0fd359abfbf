//! In-process event fan-out.
//!
//! One bounded FIFO per subscriber per session. Publish order is
//! preserved to every live subscriber; a subscriber whose buffer fills
//! receives a terminal `dropped{slow_consumer}` frame in its reserved
//! last slot and is removed, so a session never blocks on one slow
//! consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use cw_domain::wire::{DropReason, ServerEvent, ServerFrame};

/// Total queue capacity per subscriber; one slot is reserved for the
/// terminal drop frame, so the backpressure threshold is one less.
pub const SUBSCRIBER_BUFFER: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ServerFrame>,
}

/// A subscription to one session's event stream.
pub struct Subscription {
    pub rx: mpsc::Receiver<ServerFrame>,
    pub id: u64,
}

/// Fan-out bus for server events, keyed by session id.
#[derive(Default)]
pub struct EventBus {
    sessions: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a session.
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .entry(session_id.to_owned())
            .or_default()
            .push(Subscriber { id, tx });
        Subscription { rx, id }
    }

    /// Remove one subscriber (client went away on its own).
    pub fn unsubscribe(&self, session_id: &str, subscription_id: u64) {
        let mut sessions = self.sessions.lock();
        if let Some(subs) = sessions.get_mut(session_id) {
            subs.retain(|s| s.id != subscription_id);
            if subs.is_empty() {
                sessions.remove(session_id);
            }
        }
    }

    /// Publish an event to every live subscriber of a session.
    ///
    /// O(1) enqueue per subscriber; never blocks.
    pub fn publish(&self, session_id: &str, event: ServerEvent) {
        let mut sessions = self.sessions.lock();
        let Some(subs) = sessions.get_mut(session_id) else {
            return;
        };

        subs.retain(|sub| {
            let frame = ServerFrame { session_id: session_id.to_owned(), event: event.clone() };
            if sub.tx.capacity() > 1 {
                // try_send cannot fail on capacity here; a closed receiver
                // drops the subscriber.
                sub.tx.try_send(frame).is_ok()
            } else {
                // Buffer exhausted: terminal drop frame into the reserved
                // slot, then remove the subscriber.
                tracing::warn!(session_id, subscriber = sub.id, "dropping slow consumer");
                let _ = sub.tx.try_send(ServerFrame {
                    session_id: session_id.to_owned(),
                    event: ServerEvent::Dropped { reason: DropReason::SlowConsumer },
                });
                false
            }
        });

        if subs.is_empty() {
            sessions.remove(session_id);
        }
    }

    /// Close every subscription for a session (session disposed).
    pub fn close_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Number of live subscribers for a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions.lock().get(session_id).map_or(0, |s| s.len())
    }
}
