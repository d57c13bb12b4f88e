//! # Tracer collaborator and owned span handles.
//!
//! The runtime only needs a minimal tracing surface: initialize once, open
//! spans (optionally under a parent context), attach attributes, set a
//! status, and close. [`Tracer`] captures exactly that; a deployment can
//! plug in an OTLP-backed implementation, while [`RuntimeTracer`] serves
//! as the built-in collaborator.
//!
//! ## Rules
//! - A [`SpanHandle`] is owned by whoever opened it and is closed exactly
//!   once; `Drop` guarantees closure on every control-flow exit, including
//!   panics unwinding through handler code.
//! - A child span inherits the parent's `trace_id` and gets a fresh
//!   `span_id`; without a parent, a fresh `trace_id` is generated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use crate::error::RuntimeError;
use crate::logging::gen_hex;
use crate::trace::TraceContext;

/// Terminal status of a span.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanStatus {
    /// No explicit status set.
    #[default]
    Unset,
    /// Completed successfully.
    Ok,
    /// Completed with an error.
    Error,
}

/// Finished-span record handed to the tracer backend.
#[derive(Clone, Debug)]
pub struct SpanRecord {
    /// Operation name the span was opened with.
    pub operation: String,
    /// Context of the span itself.
    pub context: TraceContext,
    /// Key/value attributes in insertion order.
    pub attributes: Vec<(String, String)>,
    /// Terminal status.
    pub status: SpanStatus,
    /// Optional status message (set alongside an error status).
    pub message: Option<String>,
    /// Wall-clock duration from open to close.
    pub duration: std::time::Duration,
}

type SpanSink = Arc<dyn Fn(SpanRecord) + Send + Sync>;

/// Owned token for one open span.
///
/// Dropped (or explicitly [`end`](SpanHandle::end)ed) handles deliver a
/// [`SpanRecord`] to their tracer's sink exactly once.
pub struct SpanHandle {
    context: TraceContext,
    operation: String,
    started_at: Instant,
    attributes: Vec<(String, String)>,
    status: SpanStatus,
    message: Option<String>,
    sink: Option<SpanSink>,
}

impl SpanHandle {
    /// Trace context of this span (for propagation into child work).
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// `(trace_id, span_id)` of this span, hex-encoded.
    pub fn trace_and_span_ids(&self) -> (String, String) {
        (self.context.trace_id.clone(), self.context.span_id.clone())
    }

    /// Attaches one attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    /// Attaches a batch of attributes.
    pub fn set_attributes<I, K, V>(&mut self, attrs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in attrs {
            self.attributes.push((k.into(), v.into()));
        }
    }

    /// Sets the terminal status (last write wins).
    pub fn set_status(&mut self, status: SpanStatus, message: Option<&str>) {
        self.status = status;
        self.message = message.map(str::to_string);
    }

    /// Closes the span now. Equivalent to dropping the handle.
    pub fn end(self) {}

    fn finish(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        sink(SpanRecord {
            operation: std::mem::take(&mut self.operation),
            context: self.context.clone(),
            attributes: std::mem::take(&mut self.attributes),
            status: self.status,
            message: self.message.take(),
            duration: self.started_at.elapsed(),
        });
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

/// # Minimal tracing collaborator interface.
pub trait Tracer: Send + Sync + 'static {
    /// One-time setup against the export endpoint.
    fn initialize(&self, service_name: &str, endpoint: &str) -> Result<(), RuntimeError>;

    /// Opens a span, optionally as a child of `parent`.
    fn start_span(&self, operation: &str, parent: Option<&TraceContext>) -> SpanHandle;
}

/// Span counters shared between the tracer and its sinks.
#[derive(Default)]
struct Counters {
    started: AtomicU64,
    ended: AtomicU64,
    errored: AtomicU64,
}

/// Built-in tracer: W3C-shaped ids, span lifecycles recorded through
/// `tracing`, counters exposed for tests and the metrics probe.
#[derive(Default)]
pub struct RuntimeTracer {
    initialized: AtomicBool,
    counters: Arc<Counters>,
}

impl RuntimeTracer {
    /// Creates an uninitialized tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `initialize` has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Spans opened since construction.
    pub fn spans_started(&self) -> u64 {
        self.counters.started.load(Ordering::Relaxed)
    }

    /// Spans closed since construction.
    pub fn spans_ended(&self) -> u64 {
        self.counters.ended.load(Ordering::Relaxed)
    }

    /// Spans closed with an error status.
    pub fn spans_errored(&self) -> u64 {
        self.counters.errored.load(Ordering::Relaxed)
    }
}

impl Tracer for RuntimeTracer {
    fn initialize(&self, service_name: &str, endpoint: &str) -> Result<(), RuntimeError> {
        self.initialized.store(true, Ordering::Release);
        trace!(service = service_name, endpoint, "tracer initialized");
        Ok(())
    }

    fn start_span(&self, operation: &str, parent: Option<&TraceContext>) -> SpanHandle {
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        let context = match parent {
            Some(parent) if !parent.is_empty() => TraceContext {
                trace_id: parent.trace_id.clone(),
                span_id: gen_hex(16),
                sampled: parent.sampled,
                tracestate: parent.tracestate.clone(),
            },
            _ => TraceContext {
                trace_id: gen_hex(32),
                span_id: gen_hex(16),
                sampled: true,
                tracestate: String::new(),
            },
        };

        let counters = Arc::clone(&self.counters);
        let sink: SpanSink = Arc::new(move |record: SpanRecord| {
            counters.ended.fetch_add(1, Ordering::Relaxed);
            if record.status == SpanStatus::Error {
                counters.errored.fetch_add(1, Ordering::Relaxed);
            }
            trace!(
                operation = %record.operation,
                trace_id = %record.context.trace_id,
                span_id = %record.context.span_id,
                status = ?record.status,
                message = record.message.as_deref().unwrap_or(""),
                attributes = record.attributes.len(),
                duration_us = record.duration.as_micros() as u64,
                "span closed"
            );
        });

        SpanHandle {
            context,
            operation: operation.to_string(),
            started_at: Instant::now(),
            attributes: Vec::new(),
            status: SpanStatus::Unset,
            message: None,
            sink: Some(sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_span_inherits_trace_id() {
        let tracer = Arc::new(RuntimeTracer::new());
        let root = tracer.start_span("root", None);
        let (trace_id, root_span_id) = root.trace_and_span_ids();
        assert_eq!(trace_id.len(), 32);
        assert_eq!(root_span_id.len(), 16);

        let child = tracer.start_span("child", Some(root.context()));
        assert_eq!(child.context().trace_id, trace_id);
        assert_ne!(child.context().span_id, root_span_id);
    }

    #[test]
    fn spans_close_exactly_once_and_count_errors() {
        let tracer = Arc::new(RuntimeTracer::new());

        let mut ok = tracer.start_span("ok", None);
        ok.set_status(SpanStatus::Ok, None);
        ok.end();

        {
            let mut failed = tracer.start_span("failed", None);
            failed.set_attribute("message.type", "demo.Ping");
            failed.set_status(SpanStatus::Error, Some("decode failed"));
            // Dropped without an explicit end: still closed once.
        }

        assert_eq!(tracer.spans_started(), 2);
        assert_eq!(tracer.spans_ended(), 2);
        assert_eq!(tracer.spans_errored(), 1);
    }

    #[test]
    fn span_context_renders_valid_traceparent() {
        let tracer = Arc::new(RuntimeTracer::new());
        let span = tracer.start_span("op", None);
        let headers = span.context().inject("abcd1234");
        let parsed = TraceContext::extract(&headers);
        assert_eq!(&parsed, span.context());
    }
}
