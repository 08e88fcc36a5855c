use bytes::Bytes;
use futures::{channel::mpsc, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
};

use crate::{error::Concept2Error, protocol::Frame};

/// Kinds of events published by a device adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Report payload with the report id stripped
    Data,
    /// Fully decoded CSAFE frame
    Frame,
    /// Decoder or inbound transport failure
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Frame => write!(f, "frame"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Report payload, delivered before it reaches the frame decoder
    Data(Bytes),
    /// Decoded frame
    Frame(Frame),
    /// Failure on the inbound path
    Error(Concept2Error),
}

impl AdapterEvent {
    /// Kind of this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Data(_) => EventKind::Data,
            Self::Frame(_) => EventKind::Frame,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Identity of a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&AdapterEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Observer registry keyed by event kind
///
/// Subscribers are invoked in registration order. The subscriber list is
/// snapshotted before each delivery, so a subscriber added while an event is
/// being delivered first sees the next event, and one removed mid-delivery
/// still receives the event in flight. Clones share the same registry, which
/// lets callbacks hold a handle and manage subscriptions themselves.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventDispatcher {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one kind of event
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&AdapterEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.subscribers.push(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a subscriber, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = lock(&self.registry);
        let before = registry.subscribers.len();
        registry.subscribers.retain(|s| s.id != id);
        registry.subscribers.len() != before
    }

    /// Remove every subscriber
    pub fn clear(&self) {
        lock(&self.registry).subscribers.clear();
    }

    /// Number of subscribers registered for a kind of event
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .subscribers
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Subscribe to a kind of event as an asynchronous stream
    ///
    /// The subscription is removed when the stream is dropped.
    #[must_use]
    pub fn stream(&self, kind: EventKind) -> EventStream {
        let (sender, receiver) = mpsc::unbounded();
        let id = self.subscribe(kind, move |event| {
            let _ = sender.unbounded_send(event.clone());
        });

        EventStream {
            receiver,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an event to the current subscribers of its kind
    ///
    /// Returns the number of subscribers invoked.
    pub fn emit(&self, event: &AdapterEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Handler> = lock(&self.registry)
            .subscribers
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &snapshot {
            handler(event);
        }

        snapshot.len()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventDispatcher")
            .field("subscribers", &registry.subscribers.len())
            .finish()
    }
}

/// Stream of events of one kind
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<AdapterEvent>,
    id: SubscriptionId,
    registry: Weak<Mutex<Registry>>,
}

impl EventStream {
    /// Subscription backing this stream
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Stream for EventStream {
    type Item = AdapterEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.retain(|s| s.id != self.id);
        }
    }
}
