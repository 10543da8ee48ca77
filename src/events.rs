//! Track lifecycle events.
//!
//! Components that mutate tracks on the backend (rename, delete, upload)
//! publish a [`TrackEvent`]; map sessions and lists subscribe to keep their
//! local copies in step. The bus is a cheap cloneable handle, every clone
//! talks to the same subscriber list.

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde::{Deserialize, Serialize};

/// Something happened to a track on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackEvent {
    Deleted { id: String },
    Renamed { id: String, name: String },
    Uploaded { id: String },
}

impl TrackEvent {
    pub fn track_id(&self) -> &str {
        match self {
            TrackEvent::Deleted { id }
            | TrackEvent::Renamed { id, .. }
            | TrackEvent::Uploaded { id } => id,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&TrackEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler)>,
}

/// Cloneable publish/subscribe handle for [`TrackEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        // A panicking handler must not take the bus down with it
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TrackEvent) + Send + Sync + 'static,
    {
        let mut subs = self.lock();
        subs.next_id += 1;
        let id = SubscriptionId(subs.next_id);
        subs.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.handlers.len();
        subs.handlers.retain(|(sid, _)| *sid != id);
        subs.handlers.len() != before
    }

    /// Deliver `event` to every subscriber, in subscription order.
    ///
    /// Handlers run outside the lock so they may publish or subscribe.
    pub fn publish(&self, event: &TrackEvent) -> usize {
        let handlers: Vec<Handler> = self.lock().handlers.iter().map(|(_, h)| h.clone()).collect();
        debug!(
            "[EventBus] {:?} -> {} subscriber(s)",
            event,
            handlers.len()
        );
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().handlers.len()
    }
}
