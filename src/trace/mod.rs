//! # Distributed tracing: W3C context propagation and the tracer seam.
//!
//! - [`TraceContext`] carries a `traceparent`/`tracestate` pair between
//!   bus headers (or embedded message metadata) and spans.
//! - [`Tracer`] is the minimal collaborator interface the runtime calls;
//!   [`RuntimeTracer`] is the built-in implementation that generates
//!   W3C-shaped ids and records span lifecycles through `tracing`.
//! - [`SpanHandle`] is the owned token for one span; it closes itself on
//!   every control-flow exit via `Drop`.

mod context;
mod tracer;

pub use context::{TraceContext, CORRELATION_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER};
pub use tracer::{RuntimeTracer, SpanHandle, SpanStatus, Tracer};
