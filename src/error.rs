//! # Error types used by the runtime and by user-supplied work.
//!
//! This module defines the error enums of the crate:
//!
//! - [`RuntimeError`] errors raised by the host runtime itself (startup,
//!   registration, tracing initialization).
//! - [`TaskError`] errors raised by individual scheduled-task executions.
//! - [`CacheError`] errors raised by cache construction and typed lookup.
//! - [`CodecError`] errors raised while encoding/decoding typed messages.
//!
//! All types provide an `as_label` helper that returns a short stable
//! snake_case label for logs and metrics.
//!
//! The runtime recovers locally from every per-message and per-task error
//! to preserve liveness; only startup errors surface to the caller.

use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the host runtime.
///
/// These represent failures of the orchestration layer itself. Apart from
/// registration validation, they can only occur during startup.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Infrastructure initialization failed; the service never reaches the
    /// running state.
    #[error("initialization failed: {reason}")]
    InitFailure {
        /// Human-readable cause (bus connect failure, durable-layer setup, ...).
        reason: String,
    },

    /// The post-startup health check reported an unhealthy service.
    #[error("health check failed, status: {status}")]
    HealthCheckFailed {
        /// Status string at the time of the check.
        status: String,
    },

    /// Tracing collaborator could not be initialized.
    #[error("tracing initialization failed: {reason}")]
    TracingInit { reason: String },

    /// A handler batch failed up-front validation; nothing was applied.
    #[error("invalid handler registration: {reason}")]
    InvalidRegistration { reason: String },

    /// The staged startup was driven out of order.
    #[error("startup sequence error: {reason}")]
    StartupSequence { reason: String },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InitFailure { .. } => "runtime_init_failure",
            RuntimeError::HealthCheckFailed { .. } => "runtime_health_check_failed",
            RuntimeError::TracingInit { .. } => "runtime_tracing_init",
            RuntimeError::InvalidRegistration { .. } => "runtime_invalid_registration",
            RuntimeError::StartupSequence { .. } => "runtime_startup_sequence",
        }
    }
}

/// # Errors produced by scheduled-task executions.
///
/// Returned by the async bodies handed to the
/// [`Scheduler`](crate::sched::Scheduler); every variant counts as one
/// failure in the task's statistics. The scheduler never propagates these
/// further.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Task execution exceeded its configured timeout.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Task execution failed.
    #[error("execution failed: {reason}")]
    Fail { reason: String },
}

impl TaskError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fail { .. } => "task_failed",
        }
    }

    /// Convenience constructor for the common string-reason case.
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }
}

/// # Errors produced by the cache substrate.
///
/// Both variants are programmer errors and surface to the caller; no cache
/// operation after successful construction can fail.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache capacity must be at least one entry.
    #[error("cache capacity must be greater than 0")]
    InvalidCapacity,

    /// A cache with this name exists but stores different key/value types.
    #[error("cache '{name}' exists with a different key/value type")]
    TypeMismatch {
        /// Name of the conflicting cache.
        name: String,
    },
}

impl CacheError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            CacheError::InvalidCapacity => "cache_invalid_capacity",
            CacheError::TypeMismatch { .. } => "cache_type_mismatch",
        }
    }
}

/// # Errors produced by the typed-message codec.
///
/// Decode failures are swallowed by the dispatcher after logging and span
/// annotation; encode failures are swallowed by the publisher. Neither is
/// ever surfaced to the bus.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodecError {
    /// Payload could not be encoded for the wire.
    #[error("failed to encode {type_name}: {reason}")]
    Encode {
        type_name: &'static str,
        reason: String,
    },

    /// Payload bytes could not be decoded into the registered type.
    #[error("failed to decode {type_name}: {reason}")]
    Decode {
        type_name: &'static str,
        reason: String,
    },
}

impl CodecError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            CodecError::Encode { .. } => "codec_encode",
            CodecError::Decode { .. } => "codec_decode",
        }
    }
}
