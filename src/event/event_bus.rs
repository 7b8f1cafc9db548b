//! # Event Bus
//!
//! Broadcast hub for inbound events. Platform adapters publish what they
//! receive; `emit` actions and fired timers publish custom events. The
//! runtime's event loop subscribes and dispatches each event to the
//! matching handlers.
//!
//! Tokio's broadcast channel is used so that several consumers (the event
//! loop, dashboards, tests) can observe the same stream. Slow receivers lag
//! and skip events rather than blocking publishers.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{EventKind, InboundEvent};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Failed to send event: {message}")]
    SendFailed { message: String },

    #[error("Failed to receive event: {message}")]
    ReceiveFailed { message: String },

    #[error("Receiver lagged behind by {count} events")]
    Lagged { count: u64 },
}

pub type EventResult<T> = Result<T, EventError>;

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<InboundEvent>,
    capacity: usize,
    /// Keeps the channel open while nobody else listens.
    _internal_receiver: broadcast::Receiver<InboundEvent>,
}

impl EventBus {
    /// Creates a bus buffering at most `capacity` unread events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            _internal_receiver: receiver,
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe())
    }

    /// Publishes an event to all current subscribers.
    ///
    /// # Errors
    ///
    /// Returns `SendFailed` if the channel is closed.
    pub fn publish(&self, event: InboundEvent) -> EventResult<()> {
        debug_event("Publishing", &event);
        self.sender
            .send(event)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn queue_size(&self) -> usize {
        self.sender.len()
    }

    pub fn subscribers_size(&self) -> usize {
        // The internal receiver is not a subscriber.
        self.sender.receiver_count().saturating_sub(1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub fn debug_event(prefix: &str, event: &InboundEvent) {
    match event.kind {
        EventKind::Timer => trace!("{} Event: {}", prefix, event.name()),
        _ => debug!("{} Event: {}", prefix, event.name()),
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<InboundEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<InboundEvent>) -> Self {
        Self { receiver }
    }

    /// Receives the next event. After a lag the receiver resubscribes at the
    /// head of the channel and reports how many events were skipped.
    pub async fn recv(&mut self) -> EventResult<InboundEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }
}
