//! Transport Boundary
//!
//! The only thing a `GameSession` needs from the outside world: publish a
//! peer event, and have events on a topic delivered to a sink. Delivery is
//! FIFO per publisher. Whether it is at-least-once or exactly-once is up to
//! the implementation.
//!
//! `LocalRelay` is the in-process implementation used by tests and the demo;
//! `WsTransport` (in `client`) talks to the WebSocket relay.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

use crate::network::protocol::{PeerEvent, Topic};

/// Where subscribed events are pushed.
///
/// A session passes the same sink for all of its topics so that events keep
/// the order in which they were published.
pub type EventSink = mpsc::UnboundedSender<PeerEvent>;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Transport has been shut down.
    #[error("Transport closed")]
    Closed,
}

/// Publish/subscribe channel between the two sessions of a room.
pub trait Transport: Send + Sync {
    /// Send an event to the room. Fire-and-forget: success means the event
    /// was handed off, not that the peer received it.
    fn publish(&self, event: PeerEvent) -> Result<(), TransportError>;

    /// Deliver every future event on `topic` to `sink`.
    fn subscribe(&self, topic: Topic, sink: EventSink) -> Result<(), TransportError>;
}

// =============================================================================
// TOPIC ROUTER
// =============================================================================

/// Fan-out table from topic to subscriber sinks.
#[derive(Default)]
pub struct TopicRouter {
    subscribers: Mutex<BTreeMap<Topic, Vec<EventSink>>>,
}

impl TopicRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink for a topic.
    pub fn subscribe(&self, topic: Topic, sink: EventSink) {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.entry(topic).or_default().push(sink);
    }

    /// Push an event to every live sink on its topic.
    ///
    /// Sinks whose receiver is gone are dropped. Returns the number of sinks
    /// that accepted the event.
    pub fn deliver(&self, event: &PeerEvent) -> usize {
        let topic = event.topic();
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sinks) = subs.get_mut(&topic) else {
            trace!("No subscribers on {}", topic);
            return 0;
        };

        sinks.retain(|sink| sink.send(event.clone()).is_ok());
        let delivered = sinks.len();
        if sinks.is_empty() {
            subs.remove(&topic);
        }
        delivered
    }

    /// Number of live sinks on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.get(topic)
            .map(|sinks| sinks.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

// =============================================================================
// LOCAL RELAY
// =============================================================================

/// In-process transport shared by both sessions of a room.
///
/// Every subscriber receives every event on its topic, including the
/// publisher's own; sessions discard their own echoes.
#[derive(Default)]
pub struct LocalRelay {
    router: TopicRouter,
    closed: AtomicBool,
    published: AtomicU64,
}

impl LocalRelay {
    /// Create a new relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse further publishes and drop all subscriptions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.router.clear();
    }

    /// Number of events accepted so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.router.subscriber_count(topic)
    }
}

impl Transport for LocalRelay {
    fn publish(&self, event: PeerEvent) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        self.router.deliver(&event);
        Ok(())
    }

    fn subscribe(&self, topic: Topic, sink: EventSink) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.router.subscribe(topic, sink);
        Ok(())
    }
}
