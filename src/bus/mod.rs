//! # Message-bus client abstraction.
//!
//! The runtime is transport-agnostic: every component talks to the bus
//! through the [`BusClient`] trait, which captures exactly the capabilities
//! the runtime needs and nothing more:
//!
//! - connect to a URL with observable connection state,
//! - publish raw bytes to a subject, with or without headers,
//! - subscribe with a callback invoked per received message on a bus-owned
//!   task,
//! - idempotent close, and an optional durable-stream context.
//!
//! Messages on the wire are opaque byte payloads; typing lives one layer up
//! in [`dispatch`](crate::dispatch). Subscription callbacks must not block:
//! the dispatcher's callback only extracts headers, opens a span, and hands
//! the real work to the worker pool.
//!
//! [`MemoryBus`] is an in-process loopback implementation used by tests and
//! demos; a real deployment plugs in a NATS-backed (or equivalent) client.

mod memory;
pub mod subject;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryBus;

/// String key/value headers attached to a published message.
pub type Headers = HashMap<String, String>;

/// A single message handed to a subscription callback.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Subject the message arrived on.
    pub subject: String,
    /// Optional wire headers (traced publishes carry trace context here).
    pub headers: Option<Headers>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

/// Callback invoked by the bus client for each received message.
///
/// Runs on a bus-owned task and must return quickly.
pub type SubscriptionCallback = Arc<dyn Fn(Delivery) + Send + Sync>;

/// # Errors produced by a bus client.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// Operation attempted before `connect` succeeded (or after `close`).
    #[error("bus connection not initialized")]
    NotConnected,

    /// Connecting to the bus endpoint failed.
    #[error("failed to connect to '{url}': {reason}")]
    Connect { url: String, reason: String },

    /// A publish was rejected by the bus.
    #[error("publish to '{subject}' failed: {reason}")]
    Publish { subject: String, reason: String },

    /// A subscription could not be established.
    #[error("subscribe to '{subject}' failed: {reason}")]
    Subscribe { subject: String, reason: String },
}

impl BusError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::NotConnected => "bus_not_connected",
            BusError::Connect { .. } => "bus_connect",
            BusError::Publish { .. } => "bus_publish",
            BusError::Subscribe { .. } => "bus_subscribe",
        }
    }
}

/// # Pub/sub transport used by the runtime.
///
/// Implementations must tolerate concurrent calls; the runtime additionally
/// serializes publishes through a host-level mutex to respect clients with a
/// narrower concurrency contract.
#[async_trait]
pub trait BusClient: Send + Sync + 'static {
    /// Connects to the given endpoint URL.
    async fn connect(&self, url: &str) -> Result<(), BusError>;

    /// Returns the observable connection state.
    fn is_connected(&self) -> bool;

    /// Publishes raw bytes to a subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Publishes raw bytes with headers (used by the traced publish path).
    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: Headers,
        payload: Vec<u8>,
    ) -> Result<(), BusError>;

    /// Subscribes to a subject; `callback` is invoked per received message
    /// on a bus-owned task.
    async fn subscribe(&self, subject: &str, callback: SubscriptionCallback)
        -> Result<(), BusError>;

    /// Attaches an optional durable-stream context to the connection.
    ///
    /// Default is a no-op for transports without durable streams.
    async fn open_durable_context(&self) -> Result<(), BusError> {
        Ok(())
    }

    /// Tears down the durable-stream context, if one was opened.
    async fn close_durable_context(&self) {}

    /// Closes the connection. Idempotent.
    async fn close(&self);
}
