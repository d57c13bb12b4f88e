//! # Typed message dispatch over the bus.
//!
//! - [`BusMessage`] the typed-message adapter: canonical type name, byte
//!   codec, optional embedded trace metadata.
//! - [`Registrations`] collects `(type, routing, handler)` triples for
//!   one-shot atomic registration.
//! - [`Dispatcher`] owns the handler table and subscriptions, and turns
//!   inbound bus callbacks into worker-pool jobs with per-message spans
//!   and request-scoped loggers.

mod dispatcher;
mod message;
mod registrations;

pub use dispatcher::Dispatcher;
pub use message::{BusMessage, TraceMetadata};
pub use registrations::{Registrations, Routing};
