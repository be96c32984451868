use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

pub mod frame;
pub mod stomp;

pub use stomp::{StompSettings, StompTransport};

/// Subscription parameters, fixed for the lifetime of the process. Every
/// delivery is acknowledged individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    /// Broker-side name that makes the subscription durable across reconnects.
    pub durable_name: String,
}

/// One message handed over by the broker. Both identifiers are needed to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub subscription: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Delivery(Delivery),
    Disconnected,
    HeartbeatTimeout,
}

/// What the consumer needs from a publish/subscribe connection. Events are
/// pulled by a single task, which keeps deliveries and disconnect
/// notifications strictly ordered. Keeping the connection alive in between
/// is up to the implementation.
#[async_trait]
pub trait FeedTransport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), TransportError>;

    /// Wait for the next thing to happen on the connection. Only called while subscribed.
    async fn next_event(&mut self) -> TransportEvent;

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Drop the connection, politely if it is still up.
    async fn close(&mut self);
}
