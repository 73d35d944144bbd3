//! Client event notifications
//!
//! Listeners are plain callbacks registered per event kind. They run
//! synchronously on the task that raised the event, outside any lock.

use crate::offline_queue::QueuedRequest;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Events raised by the HTTP client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server revoked the session; the user must sign in again
    SessionInvalidated {
        /// Reason given by the server
        reason: String,
    },
    /// A failed request was stored for later replay
    RequestQueued {
        /// Queue entry id
        id: String,
        /// Target URL
        url: String,
    },
    /// A queued request was discarded without being delivered
    RequestDropped {
        /// The discarded entry
        request: QueuedRequest,
    },
}

impl ClientEvent {
    /// Discriminant used for listener registration
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::SessionInvalidated { .. } => EventKind::SessionInvalidated,
            ClientEvent::RequestQueued { .. } => EventKind::RequestQueued,
            ClientEvent::RequestDropped { .. } => EventKind::RequestDropped,
        }
    }
}

/// Event discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`ClientEvent::SessionInvalidated`]
    SessionInvalidated,
    /// See [`ClientEvent::RequestQueued`]
    RequestQueued,
    /// See [`ClientEvent::RequestDropped`]
    RequestDropped,
}

/// Event callback
pub type EventListener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener registry
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, EventKind, EventListener)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, kind, Arc::new(listener)));
        id
    }

    /// Unregister a listener; returns whether it was registered
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of listeners for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    /// Notify every listener of the event's kind; returns how many ran
    pub fn emit(&self, event: &ClientEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<EventListener> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();

        trace!(?kind, listeners = targets.len(), "Emitting client event");

        for listener in &targets {
            listener(event);
        }

        targets.len()
    }
}
