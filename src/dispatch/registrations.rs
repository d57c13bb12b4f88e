//! # Handler registration batch.
//!
//! A service declares its message handlers as data: [`Registrations`]
//! accumulates `(type, routing, handler)` triples which the dispatcher
//! validates and applies in one shot. This keeps registration explicit
//! and lets the host subscribe everything at the right point of the
//! startup sequence.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dispatch::message::BusMessage;
use crate::error::CodecError;

/// Routing mode of a handler's subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Routing {
    /// Delivered to every subscriber of the type.
    Broadcast,
    /// Addressed to one service uid.
    PointToPoint,
}

impl Routing {
    /// Stable label for logs and span attributes.
    pub fn as_label(&self) -> &'static str {
        match self {
            Routing::Broadcast => "broadcast",
            Routing::PointToPoint => "point_to_point",
        }
    }
}

/// Future returned by one handler invocation.
pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Erased handler: decodes the payload and returns the invocation future.
///
/// Decode errors surface here so the dispatcher can account for them
/// without knowing the concrete type.
pub(crate) type HandlerFn = Arc<dyn Fn(&[u8]) -> Result<HandlerFuture, CodecError> + Send + Sync>;

/// One registered handler.
#[derive(Clone)]
pub(crate) struct Registration {
    pub type_name: &'static str,
    pub routing: Routing,
    pub handler: HandlerFn,
}

/// Builder collecting handlers for atomic registration.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use servicekit::{BusMessage, Registrations, Routing};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping { text: String }
///
/// impl BusMessage for Ping {
///     fn type_name() -> &'static str { "demo.Ping" }
/// }
///
/// let regs = Registrations::new()
///     .on::<Ping, _, _>(Routing::Broadcast, |ping: Ping| async move {
///         println!("got {}", ping.text);
///     });
/// assert_eq!(regs.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Registrations {
    pub(crate) entries: Vec<Registration>,
}

impl Registrations {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a typed handler for `T` under the given routing.
    pub fn on<T, F, Fut>(mut self, routing: Routing, handler: F) -> Self
    where
        T: BusMessage,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: HandlerFn = Arc::new(move |bytes: &[u8]| {
            let record = T::decode(bytes)?;
            let handler = Arc::clone(&handler);
            Ok(Box::pin(async move { handler(record).await }) as HandlerFuture)
        });
        self.entries.push(Registration {
            type_name: T::type_name(),
            routing,
            handler: erased,
        });
        self
    }

    /// Number of collected handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates the batch: every `(type, routing)` pair at most once.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.entries {
            if !seen.insert((entry.type_name, entry.routing)) {
                return Err(format!(
                    "duplicate handler for ({}, {})",
                    entry.type_name,
                    entry.routing.as_label()
                ));
            }
        }
        Ok(())
    }
}
