//! # Service initialization configuration.
//!
//! [`InitConfig`] drives [`ServiceHost::start`](crate::host::ServiceHost::start)
//! and the staged startup pair. Presets mirror the deployment profiles a
//! service typically runs under:
//!
//! | Preset | Observability | Caches | Probe cadence |
//! |---|---|---|---|
//! | [`InitConfig::default`] | traced | modest | relaxed |
//! | [`InitConfig::production`] | traced | large | steady |
//! | [`InitConfig::development`] | traced, low thresholds | small | tight |
//! | [`InitConfig::performance`] | fast path | very large | relaxed |
//!
//! The maintenance callbacks are optional hooks on the permanent-task
//! probes; the host supplies sensible built-in behavior when they are
//! absent.

use std::sync::Arc;
use std::time::Duration;

/// Hook invoked by a maintenance probe.
pub type MaintenanceCallback = Arc<dyn Fn() + Send + Sync>;

/// Source of the queue-depth sample used by the backpressure probe.
pub type QueueSizeFn = Arc<dyn Fn() -> usize + Send + Sync>;

/// Everything startup needs to bring a service online.
#[derive(Clone)]
pub struct InitConfig {
    /// Bus endpoint. `NATS_URL` in the environment overrides this when set.
    pub bus_url: String,
    /// Attach the durable-stream context after connecting.
    pub enable_durable_stream: bool,

    /// Wire up the cache system (registry plus the cleanup task below).
    pub enable_cache: bool,
    /// Capacity for caches created through the host convenience API.
    pub default_cache_size: usize,
    /// TTL for caches created through the host convenience API.
    pub default_cache_ttl: Option<Duration>,

    /// Start the scheduler during startup.
    pub enable_scheduler: bool,
    /// Schedule the recurring expired-entry sweep across all caches.
    pub enable_auto_cache_cleanup: bool,
    /// Interval of that sweep.
    pub cache_cleanup_interval: Duration,

    /// Start the permanent maintenance task.
    pub enable_permanent_tasks: bool,
    /// Interval of the permanent maintenance task.
    pub permanent_task_interval: Duration,
    /// Run the metrics-flush probe (only logs while tracing is enabled).
    pub enable_metrics_flush: bool,
    /// Run the health-status probe.
    pub enable_health_status: bool,
    /// Run the backpressure probe.
    pub enable_backpressure_check: bool,
    /// Queue depth above which the backpressure probe warns.
    pub backpressure_threshold: usize,

    /// CPU percentage above which the health probe warns.
    pub cpu_warn_percent: f64,
    /// Resident-set bytes above which the health probe warns.
    pub memory_warn_bytes: u64,
    /// Queue depth above which the health probe warns.
    pub queue_warn_depth: usize,

    /// Fast publish path, no per-message publish spans.
    pub enable_performance_mode: bool,
    /// Trace export endpoint. `OTEL_EXPORTER_OTLP_ENDPOINT` overrides.
    pub otlp_endpoint: String,

    /// Extra work appended to the metrics-flush probe.
    pub metrics_flush_callback: Option<MaintenanceCallback>,
    /// Extra work appended to the health-status probe.
    pub health_callback: Option<MaintenanceCallback>,
    /// Extra work appended to the backpressure probe on breach.
    pub backpressure_callback: Option<MaintenanceCallback>,
    /// Replaces the worker-pool queue depth as the backpressure sample.
    pub queue_size_fn: Option<QueueSizeFn>,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            bus_url: "nats://localhost:4222".to_string(),
            enable_durable_stream: false,
            enable_cache: true,
            default_cache_size: 1000,
            default_cache_ttl: Some(Duration::from_secs(3600)),
            enable_scheduler: true,
            enable_auto_cache_cleanup: true,
            cache_cleanup_interval: Duration::from_secs(300),
            enable_permanent_tasks: true,
            permanent_task_interval: Duration::from_secs(30),
            enable_metrics_flush: true,
            enable_health_status: true,
            enable_backpressure_check: true,
            backpressure_threshold: 100,
            cpu_warn_percent: 80.0,
            memory_warn_bytes: 1024 * 1024 * 1024,
            queue_warn_depth: 500,
            enable_performance_mode: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            metrics_flush_callback: None,
            health_callback: None,
            backpressure_callback: None,
            queue_size_fn: None,
        }
    }
}

impl InitConfig {
    /// Production profile: durable stream, large caches, steady probes.
    pub fn production() -> Self {
        Self {
            enable_durable_stream: true,
            default_cache_size: 10_000,
            default_cache_ttl: Some(Duration::from_secs(2 * 3600)),
            cache_cleanup_interval: Duration::from_secs(600),
            permanent_task_interval: Duration::from_secs(30),
            backpressure_threshold: 1000,
            ..Self::default()
        }
    }

    /// Development profile: tight probes and low thresholds so problems
    /// surface immediately.
    pub fn development() -> Self {
        Self {
            default_cache_size: 100,
            default_cache_ttl: Some(Duration::from_secs(300)),
            cache_cleanup_interval: Duration::from_secs(60),
            permanent_task_interval: Duration::from_secs(10),
            backpressure_threshold: 20,
            queue_warn_depth: 50,
            ..Self::default()
        }
    }

    /// High-throughput profile: fast publish path, very large caches,
    /// minimal observability overhead.
    pub fn performance() -> Self {
        Self {
            enable_performance_mode: true,
            enable_metrics_flush: false,
            default_cache_size: 50_000,
            default_cache_ttl: Some(Duration::from_secs(600)),
            permanent_task_interval: Duration::from_secs(60),
            backpressure_threshold: 5000,
            ..Self::default()
        }
    }

    /// Bus URL after applying the `NATS_URL` environment override.
    pub fn effective_bus_url(&self) -> String {
        std::env::var("NATS_URL").unwrap_or_else(|_| self.bus_url.clone())
    }

    /// Export endpoint after applying `OTEL_EXPORTER_OTLP_ENDPOINT`.
    pub fn effective_otlp_endpoint(&self) -> String {
        std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| self.otlp_endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_where_it_matters() {
        let prod = InitConfig::production();
        assert!(prod.enable_durable_stream);
        assert!(!prod.enable_performance_mode);

        let dev = InitConfig::development();
        assert!(dev.backpressure_threshold < prod.backpressure_threshold);

        let perf = InitConfig::performance();
        assert!(perf.enable_performance_mode);
        assert!(!perf.enable_metrics_flush);
        assert!(perf.default_cache_size > prod.default_cache_size);
    }
}
