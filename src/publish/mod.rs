//! # Hot-path publisher: runtime-switchable fast / traced publish.
//!
//! Outbound publishes go through one of two [`PublishPath`]
//! implementations chosen at call time by a swappable trait-object handle.
//! There is no boolean branch on the hot path: `enable_tracing` /
//! `disable_tracing` replace the handle, and every publish dispatches
//! virtually through whatever handle it observes.
//!
//! ## Architecture
//! ```text
//! publish_broadcast / publish_point_to_point
//!        │ encode, form subject
//!        ▼
//!   path handle ──swap──► FastPath:   publish bytes
//!   (enable/disable)      TracedPath: span + inject context + publish with headers
//!        ▼
//!   publish mutex ──► bus client
//! ```
//!
//! ## Rules
//! - A toggle takes effect for the next call; in-flight calls finish on
//!   the path they started with. No call is double-counted or lost.
//! - Both paths serialize bus-level sends through one publish mutex.
//! - Failures (serialization, not connected, bus error) are logged, set
//!   the span status on the traced path, and never propagate.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::bus::{subject, BusClient, BusError, Headers};
use crate::dispatch::BusMessage;
use crate::error::CodecError;
use crate::logging::{gen_hex, CorrelatedLogger};
use crate::trace::{SpanStatus, Tracer};

/// Routing facts for one outbound publish, shared by both paths.
struct Outbound<'a> {
    subject: String,
    type_name: &'static str,
    mode: &'static str,
    target_uid: Option<&'a str>,
}

/// One publish strategy. Implementations must be total: they log and
/// swallow every failure.
#[async_trait]
trait PublishPath: Send + Sync {
    async fn send(
        &self,
        publisher: &Publisher,
        outbound: Outbound<'_>,
        payload: Result<Vec<u8>, CodecError>,
    );
}

/// Plain publish: serialize, form subject, send. No span, no headers.
struct FastPath;

#[async_trait]
impl PublishPath for FastPath {
    async fn send(
        &self,
        publisher: &Publisher,
        outbound: Outbound<'_>,
        payload: Result<Vec<u8>, CodecError>,
    ) {
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                publisher.logger.error(format!("publish dropped: {e}"));
                return;
            }
        };
        if let Err(e) = publisher.transmit(&outbound.subject, None, payload).await {
            publisher
                .logger
                .error(format!("publish to {} failed: {e}", outbound.subject));
        }
    }
}

/// Observed publish: span per call, trace context injected into headers.
struct TracedPath;

#[async_trait]
impl PublishPath for TracedPath {
    async fn send(
        &self,
        publisher: &Publisher,
        outbound: Outbound<'_>,
        payload: Result<Vec<u8>, CodecError>,
    ) {
        let mut span = publisher
            .tracer
            .start_span(&format!("publish {}", outbound.type_name), None);
        span.set_attributes([
            ("message.type", outbound.type_name.to_string()),
            ("publish.mode", outbound.mode.to_string()),
            ("service.uid", publisher.uid.clone()),
        ]);
        if let Some(target) = outbound.target_uid {
            span.set_attribute("target.uid", target);
        }

        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                publisher.logger.error(format!("publish dropped: {e}"));
                span.set_status(SpanStatus::Error, Some(&e.to_string()));
                return;
            }
        };

        let headers = span.context().inject(&gen_hex(8));
        match publisher.transmit(&outbound.subject, Some(headers), payload).await {
            Ok(()) => span.set_status(SpanStatus::Ok, None),
            Err(e) => {
                publisher
                    .logger
                    .error(format!("publish to {} failed: {e}", outbound.subject));
                span.set_status(SpanStatus::Error, Some(&e.to_string()));
            }
        }
    }
}

/// Outbound publisher with runtime-switchable observability.
pub struct Publisher {
    uid: String,
    bus: Arc<dyn BusClient>,
    tracer: Arc<dyn Tracer>,
    logger: CorrelatedLogger,
    /// Swapped whole on toggle; read once per publish.
    path: RwLock<Arc<dyn PublishPath>>,
    /// Serializes bus-level sends for both paths.
    publish_lock: tokio::sync::Mutex<()>,
}

impl Publisher {
    pub(crate) fn new(
        uid: impl Into<String>,
        bus: Arc<dyn BusClient>,
        tracer: Arc<dyn Tracer>,
        logger: CorrelatedLogger,
    ) -> Self {
        Self {
            uid: uid.into(),
            bus,
            tracer,
            logger: logger.child("publisher"),
            path: RwLock::new(Arc::new(FastPath)),
            publish_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Routes subsequent publishes through the traced path.
    pub fn enable_tracing(&self) {
        *self.path.write() = Arc::new(TracedPath);
    }

    /// Routes subsequent publishes through the fast path.
    pub fn disable_tracing(&self) {
        *self.path.write() = Arc::new(FastPath);
    }

    /// Publishes a record to every subscriber of its type.
    pub async fn publish_broadcast<T: BusMessage>(&self, message: &T) {
        let outbound = Outbound {
            subject: subject::broadcast(T::type_name()),
            type_name: T::type_name(),
            mode: "broadcast",
            target_uid: None,
        };
        let path = Arc::clone(&*self.path.read());
        path.send(self, outbound, message.encode()).await;
    }

    /// Publishes a record addressed to one service uid.
    pub async fn publish_point_to_point<T: BusMessage>(&self, target_uid: &str, message: &T) {
        let outbound = Outbound {
            subject: subject::direct(target_uid, T::type_name()),
            type_name: T::type_name(),
            mode: "point_to_point",
            target_uid: Some(target_uid),
        };
        let path = Arc::clone(&*self.path.read());
        path.send(self, outbound, message.encode()).await;
    }

    /// Single funnel to the bus: connection check + publish mutex.
    async fn transmit(
        &self,
        subject: &str,
        headers: Option<Headers>,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        if !self.bus.is_connected() {
            return Err(BusError::NotConnected);
        }
        let _guard = self.publish_lock.lock().await;
        match headers {
            Some(headers) => self.bus.publish_with_headers(subject, headers, payload).await,
            None => self.bus.publish(subject, payload).await,
        }
    }
}
