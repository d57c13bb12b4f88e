//! # Correlated structured logging.
//!
//! Every log line a service emits carries four ids: the service name, an
//! 8-hex correlation id, a 16-hex trace id, and an 8-hex span id.
//! [`CorrelatedLogger`] is a cheap value type holding those ids; child
//! loggers derive new ids without touching the parent.
//!
//! The severity threshold is process-global: initialized from `LOG_LEVEL`,
//! re-read when the host receives `SIGHUP`. Emission goes through
//! `tracing` events so any installed subscriber (console, file, JSON)
//! renders the records.
//!
//! ## Factory semantics
//! - [`child`](CorrelatedLogger::child): same correlation/trace, new span,
//!   component appended to the service name.
//! - [`span`](CorrelatedLogger::span): same correlation/trace, new span.
//! - [`request`](CorrelatedLogger::request): everything fresh; used per
//!   inbound message.

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};

use rand::Rng;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Severity levels, ordered.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    /// Parses the `LOG_LEVEL` convention; unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Some(Self::Trace),
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" | "WARNING" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            4 => Self::Error,
            _ => Self::Critical,
        }
    }
}

/// Process-global severity threshold.
static GLOBAL_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Returns the current global level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(GLOBAL_LEVEL.load(Ordering::Relaxed))
}

/// Replaces the global level.
pub fn set_level(level: LogLevel) {
    GLOBAL_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Re-reads the global level from `LOG_LEVEL`, keeping the current value
/// when the variable is absent or unparseable. Called at init and on
/// `SIGHUP`.
pub fn reload_level_from_env() {
    if let Some(parsed) = std::env::var("LOG_LEVEL").ok().as_deref().and_then(LogLevel::parse) {
        set_level(parsed);
    }
}

/// Installs the process-wide `tracing` subscriber and seeds the global
/// level from the environment. Safe to call more than once; later calls
/// only refresh the level.
pub fn init() {
    reload_level_from_env();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Generates `len` lowercase hex characters.
pub(crate) fn gen_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..16)] as char).collect()
}

/// Logger value carrying the correlation ids for one scope of work.
#[derive(Clone, Debug)]
pub struct CorrelatedLogger {
    service: String,
    correlation_id: String,
    trace_id: String,
    span_id: String,
}

impl CorrelatedLogger {
    /// Root logger for a service; all ids freshly generated.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            correlation_id: gen_hex(8),
            trace_id: gen_hex(16),
            span_id: gen_hex(8),
        }
    }

    /// Component logger: same correlation and trace, new span, component
    /// appended to the service name.
    pub fn child(&self, component: &str) -> Self {
        Self {
            service: format!("{}::{}", self.service, component),
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            span_id: gen_hex(8),
        }
    }

    /// Operation logger: same correlation and trace, new span.
    pub fn span(&self, operation: &str) -> Self {
        Self {
            service: format!("{}::{}", self.service, operation),
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            span_id: gen_hex(8),
        }
    }

    /// Request logger: fresh correlation, trace, and span ids.
    pub fn request(&self) -> Self {
        Self {
            service: self.service.clone(),
            correlation_id: gen_hex(8),
            trace_id: gen_hex(16),
            span_id: gen_hex(8),
        }
    }

    /// Service name (with component suffixes).
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Correlation id, 8 hex characters.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Trace id, 16 hex characters.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Span id, 8 hex characters.
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn trace(&self, message: impl Display) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.log(LogLevel::Error, message);
    }

    pub fn critical(&self, message: impl Display) {
        self.log(LogLevel::Critical, message);
    }

    /// Emits one structured record when `level` clears the global
    /// threshold.
    pub fn log(&self, level: LogLevel, message: impl Display) {
        if level < self::level() {
            return;
        }
        let tracing_level = match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error | LogLevel::Critical => Level::ERROR,
        };
        // `event!` needs a const level, hence the arm per level.
        match tracing_level {
            Level::TRACE => tracing::trace!(
                service = %self.service,
                correlation_id = %self.correlation_id,
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                "{message}"
            ),
            Level::DEBUG => tracing::debug!(
                service = %self.service,
                correlation_id = %self.correlation_id,
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                "{message}"
            ),
            Level::INFO => tracing::info!(
                service = %self.service,
                correlation_id = %self.correlation_id,
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                "{message}"
            ),
            Level::WARN => tracing::warn!(
                service = %self.service,
                correlation_id = %self.correlation_id,
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                "{message}"
            ),
            _ => tracing::error!(
                service = %self.service,
                correlation_id = %self.correlation_id,
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                critical = level == LogLevel::Critical,
                "{message}"
            ),
        }
    }
}
