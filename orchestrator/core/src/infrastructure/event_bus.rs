// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

// Invalidation Bus - Pub/Sub for cache coherency
//
// In-memory broadcast of key-only invalidation events over a tokio broadcast
// channel. Every subscriber gets its own bounded buffer; events for the same
// key reach a subscriber in publish order. A subscriber that falls behind by
// more than the buffer loses events and is told so (Lagged); its cache TTL
// bounds the resulting staleness.
//
// Subscriptions start at "now": there is no backlog replay.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::domain::events::InvalidationEvent;

/// Event bus for publishing and subscribing to invalidation events
#[derive(Clone)]
pub struct InvalidationBus {
    // None once the bus is closed; dropping the sender ends every receiver
    // after it drains what was already queued.
    sender: Arc<RwLock<Option<broadcast::Sender<InvalidationEvent>>>>,
}

impl InvalidationBus {
    /// Create a new bus with the given per-subscriber buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(RwLock::new(Some(sender))),
        }
    }

    /// Create bus with default capacity (1024)
    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Fire-and-forget publish. Returns false if the bus is closed.
    pub fn publish(&self, event: InvalidationEvent) -> bool {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            warn!(event = %event, "Invalidation bus closed, dropping event");
            return false;
        };

        debug!(event = %event, "Publishing invalidation");
        metrics::counter!("switchyard_bus_published_total", "kind" => event.kind.as_str())
            .increment(1);

        // send() only fails when nobody is subscribed
        let receiver_count = sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening for invalidations");
        }
        true
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> InvalidationReceiver {
        let receiver = self.sender.read().as_ref().map(|s| s.subscribe());
        InvalidationReceiver { receiver }
    }

    /// Stop accepting publishes. Receivers drain queued events, then see `Closed`.
    pub fn close(&self) {
        if self.sender.write().take().is_some() {
            debug!("Invalidation bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for invalidation events
pub struct InvalidationReceiver {
    receiver: Option<broadcast::Receiver<InvalidationEvent>>,
}

impl InvalidationReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<InvalidationEvent, EventBusError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(EventBusError::Closed);
        };
        receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Invalidation receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<InvalidationEvent, EventBusError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(EventBusError::Closed);
        };
        receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Invalidation receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Lazy, non-restartable sequence of events; ends when the bus closes.
    pub fn into_stream(
        self,
    ) -> Pin<Box<dyn Stream<Item = Result<InvalidationEvent, EventBusError>> + Send>> {
        match self.receiver {
            Some(receiver) => Box::pin(BroadcastStream::new(receiver).map(|item| {
                item.map_err(|BroadcastStreamRecvError::Lagged(n)| EventBusError::Lagged(n))
            })),
            None => Box::pin(futures::stream::empty()),
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventBusError {
    #[error("Invalidation bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::link::LinkId;
    use crate::domain::tool::ToolId;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = InvalidationBus::new(10);
        let mut receiver = bus.subscribe();

        let link = LinkId::new();
        assert!(bus.publish(InvalidationEvent::link(link)));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.link_id(), Some(link));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = InvalidationBus::new(10);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let tool = ToolId::new();
        bus.publish(InvalidationEvent::custom_tool(tool));

        assert_eq!(receiver1.recv().await.unwrap().tool_id(), Some(tool));
        assert_eq!(receiver2.recv().await.unwrap().tool_id(), Some(tool));
    }

    #[tokio::test]
    async fn test_no_backlog_replay() {
        let bus = InvalidationBus::new(10);
        bus.publish(InvalidationEvent::link(LinkId::new()));

        let mut late = bus.subscribe();
        assert_eq!(late.try_recv(), Err(EventBusError::Empty));
    }

    #[tokio::test]
    async fn test_same_key_delivered_in_publish_order() {
        let bus = InvalidationBus::new(64);
        let mut receiver = bus.subscribe();

        let a = LinkId::new();
        let b = LinkId::new();
        let order = [a, b, a, a, b];
        for id in order {
            bus.publish(InvalidationEvent::link(id));
        }

        let mut seen = Vec::new();
        for _ in 0..order.len() {
            seen.push(receiver.recv().await.unwrap().link_id().unwrap());
        }
        assert_eq!(seen, order);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told() {
        let bus = InvalidationBus::new(2);
        let mut receiver = bus.subscribe();
        for _ in 0..5 {
            bus.publish(InvalidationEvent::link(LinkId::new()));
        }
        assert!(matches!(receiver.recv().await, Err(EventBusError::Lagged(3))));
        // The two newest events are still delivered
        assert!(receiver.recv().await.is_ok());
        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let bus = InvalidationBus::new(10);
        let mut receiver = bus.subscribe();

        bus.publish(InvalidationEvent::link(LinkId::new()));
        bus.close();

        assert!(bus.is_closed());
        assert!(!bus.publish(InvalidationEvent::link(LinkId::new())));
        assert!(receiver.recv().await.is_ok());
        assert_eq!(receiver.recv().await, Err(EventBusError::Closed));

        let mut after_close = bus.subscribe();
        assert_eq!(after_close.recv().await, Err(EventBusError::Closed));
    }

    #[tokio::test]
    async fn test_stream_ends_on_close() {
        let bus = InvalidationBus::new(10);
        let stream = bus.subscribe().into_stream();

        let link = LinkId::new();
        bus.publish(InvalidationEvent::link(link));
        bus.close();

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().link_id(), Some(link));
    }
}
