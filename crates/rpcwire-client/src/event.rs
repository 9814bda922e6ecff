use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rpcwire_frame::Marker;

use crate::connection::DisconnectReason;

/// Lifecycle notification published by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The link opened and queued calls were flushed.
    Ready,
    /// The transport reported an error. A close usually follows.
    TransportError(String),
    /// The link closed or failed to open.
    Closed,
    /// A reconnection attempt was scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// The client stopped and will not reconnect on its own.
    Disconnected(DisconnectReason),
    /// An inbound frame was not a valid envelope and was dropped.
    MalformedEnvelope(String),
    /// A call was torn down by its final envelope, its timeout or a disconnect.
    CallSettled { marker: Marker },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::TransportError(_) => EventKind::TransportError,
            Self::Closed => EventKind::Closed,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::Disconnected(_) => EventKind::Disconnected,
            Self::MalformedEnvelope(_) => EventKind::MalformedEnvelope,
            Self::CallSettled { .. } => EventKind::CallSettled,
        }
    }
}

/// Discriminant of [`ClientEvent`], used to subscribe to one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    TransportError,
    Closed,
    Reconnecting,
    Disconnected,
    MalformedEnvelope,
    CallSettled,
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: Option<EventKind>,
    listener: Listener,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<Subscription>,
}

/// Publish/subscribe hub for [`ClientEvent`]s.
///
/// Listeners run in registration order, outside the bus lock, so a listener
/// may subscribe, unsubscribe or call back into the client.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind of event.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), Arc::new(listener))
    }

    /// Subscribe to every event.
    pub fn on_any<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(listener))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.entries.len();
        subscribers.entries.retain(|entry| entry.id != id);
        subscribers.entries.len() != before
    }

    /// Invoke every matching listener with `event`.
    pub fn publish(&self, event: &ClientEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.kind.is_none_or(|wanted| wanted == kind))
            .map(|entry| Arc::clone(&entry.listener))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn subscribe(&self, kind: Option<EventKind>, listener: Listener) -> SubscriptionId {
        let mut subscribers = self.lock();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.entries.push(Subscription { id, kind, listener });
        id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
