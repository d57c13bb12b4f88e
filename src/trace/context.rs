//! # W3C Trace-Context parsing and rendering.
//!
//! A `traceparent` has the form `00-<32 hex trace id>-<16 hex span id>-<2
//! hex flags>`. Extraction is forgiving: empty or malformed values yield an
//! empty context, never an error. Injection renders the canonical form and
//! adds the service-assigned correlation id header.
//!
//! When the bus client cannot carry headers, the same three fields travel
//! inside the application message as a `trace_metadata` sub-record; see
//! [`BusMessage`](crate::dispatch::BusMessage).

use crate::bus::Headers;
use crate::dispatch::{BusMessage, TraceMetadata};

/// Header key of the W3C trace parent.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header key of the W3C trace state.
pub const TRACESTATE_HEADER: &str = "tracestate";
/// Header key of the service-assigned correlation id.
pub const CORRELATION_ID_HEADER: &str = "correlation_id";

/// Parsed trace context linking spans across services.
///
/// An empty context (`Default`) means "no parent": ids are empty strings
/// and injection produces no `traceparent`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex characters; empty when absent.
    pub trace_id: String,
    /// 16 lowercase hex characters; empty when absent.
    pub span_id: String,
    /// Sampled flag from the trace flags octet.
    pub sampled: bool,
    /// Raw `tracestate` value, passed through untouched.
    pub tracestate: String,
}

impl TraceContext {
    /// Returns whether this context carries no trace identity.
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_empty() || self.span_id.is_empty()
    }

    /// Reads `traceparent`/`tracestate` from bus headers.
    ///
    /// Malformed input yields an empty context.
    pub fn extract(headers: &Headers) -> Self {
        let Some(traceparent) = headers.get(TRACEPARENT_HEADER) else {
            return Self::default();
        };
        let mut ctx = Self::parse_traceparent(traceparent).unwrap_or_default();
        if !ctx.is_empty() {
            if let Some(state) = headers.get(TRACESTATE_HEADER) {
                ctx.tracestate = state.clone();
            }
        }
        ctx
    }

    /// Renders this context into bus headers, tagging the message with the
    /// given correlation id. An empty context injects only the correlation
    /// id.
    pub fn inject(&self, correlation_id: &str) -> Headers {
        let mut headers = Headers::new();
        self.inject_into(&mut headers);
        headers.insert(CORRELATION_ID_HEADER.to_string(), correlation_id.to_string());
        headers
    }

    /// Writes `traceparent`/`tracestate` into an existing header map.
    pub fn inject_into(&self, headers: &mut Headers) {
        if self.is_empty() {
            return;
        }
        headers.insert(TRACEPARENT_HEADER.to_string(), self.to_traceparent());
        if !self.tracestate.is_empty() {
            headers.insert(TRACESTATE_HEADER.to_string(), self.tracestate.clone());
        }
    }

    /// Canonical `traceparent` rendering of this context.
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }

    /// Reads trace context embedded in a message, for transports without
    /// header support. Messages that do not carry metadata (the default)
    /// yield an empty context.
    pub fn extract_from_message<T: BusMessage>(message: &T) -> Self {
        let Some(metadata) = message.trace_metadata() else {
            return Self::default();
        };
        let mut ctx = Self::parse_traceparent(&metadata.traceparent).unwrap_or_default();
        if !ctx.is_empty() {
            ctx.tracestate = metadata.tracestate;
        }
        ctx
    }

    /// Embeds this context (plus the correlation id) into a message, for
    /// transports without header support. A no-op on message types that do
    /// not carry metadata.
    pub fn inject_into_message<T: BusMessage>(&self, message: &mut T, correlation_id: &str) {
        message.apply_trace_metadata(TraceMetadata {
            traceparent: if self.is_empty() {
                String::new()
            } else {
                self.to_traceparent()
            },
            tracestate: self.tracestate.clone(),
            correlation_id: correlation_id.to_string(),
        });
    }

    fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        if version.len() != 2 || !is_lower_hex(version) || version == "ff" {
            return None;
        }
        if trace_id.len() != 32 || !is_lower_hex(trace_id) || all_zero(trace_id) {
            return None;
        }
        if span_id.len() != 16 || !is_lower_hex(span_id) || all_zero(span_id) {
            return None;
        }
        if flags.len() != 2 || !is_lower_hex(flags) {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            sampled: u8::from_str_radix(flags, 16).map(|f| f & 0x01 == 0x01).unwrap_or(false),
            tracestate: String::new(),
        })
    }
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn all_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}
