//! # Typed-message adapter.
//!
//! Messages travel the bus as opaque bytes plus a canonical type name.
//! [`BusMessage`] is the pluggable seam between application records and
//! the wire: the provided methods encode/decode through JSON, and a type
//! can override them for any other representation without the runtime
//! noticing.
//!
//! When the transport cannot carry headers, trace context rides inside
//! the record itself as a [`TraceMetadata`] sub-record; overriding the
//! two metadata hooks opts a message type into that convention.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Trace fields embedded in a message for header-less transports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMetadata {
    /// W3C trace parent, `00-<trace>-<span>-<flags>`.
    #[serde(default)]
    pub traceparent: String,
    /// W3C trace state, passed through untouched.
    #[serde(default)]
    pub tracestate: String,
    /// Service-assigned correlation id.
    #[serde(default)]
    pub correlation_id: String,
}

impl TraceMetadata {
    /// Returns whether no trace identity is present.
    pub fn is_empty(&self) -> bool {
        self.traceparent.is_empty()
    }
}

/// # A record that can travel the bus.
///
/// `type_name` must be stable and unique per record type; it becomes the
/// final segment of the bus subject and the dispatch key.
pub trait BusMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Canonical fully-qualified type name, e.g. `"orders.OrderPlaced"`.
    fn type_name() -> &'static str;

    /// Encodes the record for the wire.
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode {
            type_name: Self::type_name(),
            reason: e.to_string(),
        })
    }

    /// Decodes a record from wire bytes.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            type_name: Self::type_name(),
            reason: e.to_string(),
        })
    }

    /// Reads embedded trace metadata, when the schema carries it.
    fn trace_metadata(&self) -> Option<TraceMetadata> {
        None
    }

    /// Writes embedded trace metadata, when the schema carries it.
    fn apply_trace_metadata(&mut self, _metadata: TraceMetadata) {}
}
