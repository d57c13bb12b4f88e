//! # Permanent maintenance loop and health sampling.
//!
//! One recurring scheduler task drives three probes, each gated by its own
//! config flag:
//!
//! - **metrics flush** — summary metrics, only while tracing is enabled;
//! - **health status** — CPU%, resident memory, queue depth against
//!   thresholds, WARN on breach;
//! - **backpressure** — worker-queue depth against the configured
//!   threshold, WARN with pool stats on breach.
//!
//! CPU usage is process time over wall time between samples; the tracker
//! keeps the previous sample and refuses to resample more often than every
//! 5 seconds, whatever the probe cadence. Sampling reads `/proc` and
//! degrades to "unavailable" off Linux.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{InitConfig, MaintenanceCallback, QueueSizeFn};
use crate::host::ServiceHost;
use crate::sched::TaskConfig;

/// Minimum spacing between CPU samples.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Scheduler task name of the permanent maintenance loop.
pub(crate) const PERMANENT_TASK_NAME: &str = "permanent_maintenance";

/// Point-in-time health reading.
#[derive(Clone, Debug)]
pub struct HealthSnapshot {
    /// Process CPU percentage since the previous sample; `None` when the
    /// platform offers no reading yet.
    pub cpu_percent: Option<f64>,
    /// Resident set size in bytes; `None` off Linux.
    pub resident_bytes: Option<u64>,
    /// Worker-pool queue depth.
    pub queue_depth: usize,
}

/// Keeps the previous `(wall, process)` sample between health probes.
pub(crate) struct CpuTracker {
    last: Option<(Instant, Duration)>,
    last_percent: Option<f64>,
}

impl CpuTracker {
    pub(crate) fn new() -> Self {
        Self {
            last: None,
            last_percent: None,
        }
    }

    /// Returns the CPU percentage, resampling at most every
    /// [`CPU_SAMPLE_INTERVAL`].
    fn sample(&mut self) -> Option<f64> {
        let process = process_cpu_time()?;
        let now = Instant::now();

        match self.last {
            None => {
                self.last = Some((now, process));
                None
            }
            Some((last_wall, last_process)) => {
                let elapsed = now.duration_since(last_wall);
                if elapsed < CPU_SAMPLE_INTERVAL {
                    return self.last_percent;
                }
                let used = process.saturating_sub(last_process);
                let percent = 100.0 * used.as_secs_f64() / elapsed.as_secs_f64();
                self.last = Some((now, process));
                self.last_percent = Some(percent);
                Some(percent)
            }
        }
    }
}

/// Probe configuration captured from [`InitConfig`] at startup.
#[derive(Clone)]
struct ProbeConfig {
    metrics_flush: bool,
    health_status: bool,
    backpressure_check: bool,
    backpressure_threshold: usize,
    cpu_warn_percent: f64,
    memory_warn_bytes: u64,
    queue_warn_depth: usize,
    metrics_flush_callback: Option<MaintenanceCallback>,
    health_callback: Option<MaintenanceCallback>,
    backpressure_callback: Option<MaintenanceCallback>,
    queue_size_fn: Option<QueueSizeFn>,
}

impl ProbeConfig {
    fn capture(config: &InitConfig) -> Self {
        Self {
            metrics_flush: config.enable_metrics_flush,
            health_status: config.enable_health_status,
            backpressure_check: config.enable_backpressure_check,
            backpressure_threshold: config.backpressure_threshold,
            cpu_warn_percent: config.cpu_warn_percent,
            memory_warn_bytes: config.memory_warn_bytes,
            queue_warn_depth: config.queue_warn_depth,
            metrics_flush_callback: config.metrics_flush_callback.clone(),
            health_callback: config.health_callback.clone(),
            backpressure_callback: config.backpressure_callback.clone(),
            queue_size_fn: config.queue_size_fn.clone(),
        }
    }
}

impl ServiceHost {
    /// Point-in-time health reading (also used by the health probe).
    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            cpu_percent: self.cpu.lock().sample(),
            resident_bytes: resident_memory_bytes(),
            queue_depth: self.pool.pending(),
        }
    }

    /// Schedules the recurring expired-entry sweep over every cache.
    pub(crate) fn schedule_cache_cleanup(self: &Arc<Self>, config: &InitConfig) {
        let weak = Arc::downgrade(self);
        let id = self.scheduler.schedule_interval(
            "cache_cleanup",
            config.cache_cleanup_interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(host) = weak.upgrade() {
                        let removed = host.caches.cleanup_expired_all();
                        if removed > 0 {
                            host.logger
                                .debug(format!("cache cleanup removed {removed} expired entries"));
                        }
                    }
                    Ok(())
                }
            },
        );
        *self.cleanup_task_id.lock() = Some(id);
    }

    /// Starts the permanent maintenance task.
    pub(crate) fn start_permanent_tasks(self: &Arc<Self>, config: &InitConfig) {
        if self.permanent_tasks_running.swap(true, Ordering::AcqRel) {
            return;
        }

        let probe = ProbeConfig::capture(config);
        let weak = Arc::downgrade(self);
        let id = self.scheduler.schedule_interval_with_config(
            PERMANENT_TASK_NAME,
            config.permanent_task_interval,
            move || {
                let weak = weak.clone();
                let probe = probe.clone();
                async move {
                    if let Some(host) = weak.upgrade() {
                        host.run_maintenance_probes(&probe);
                    }
                    Ok(())
                }
            },
            TaskConfig {
                enabled: true,
                timeout: Some(Duration::from_secs(10)),
            },
        );
        *self.permanent_task_id.lock() = Some(id);
        self.logger.debug("permanent maintenance task started");
    }

    /// Cancels the maintenance and cleanup tasks; part of shutdown.
    pub(crate) fn stop_permanent_tasks(&self) {
        if let Some(id) = self.cleanup_task_id.lock().take() {
            self.scheduler.cancel(id);
        }
        if !self.permanent_tasks_running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.permanent_task_id.lock().take() {
            self.scheduler.cancel(id);
        }
    }

    /// Body of the permanent task: the three probes in order.
    fn run_maintenance_probes(&self, probe: &ProbeConfig) {
        if !self.permanent_tasks_running.load(Ordering::Acquire) {
            return;
        }

        if probe.metrics_flush && self.is_tracing_enabled() {
            self.logger.info(format!(
                "metrics: service={} queue_depth={} workers={} caches={}",
                self.identity.service_name,
                self.pool.pending(),
                self.pool.size(),
                self.caches.len(),
            ));
            if let Some(callback) = &probe.metrics_flush_callback {
                callback();
            }
        }

        if probe.health_status {
            let snapshot = self.health_snapshot();
            if let Some(cpu) = snapshot.cpu_percent {
                if cpu > probe.cpu_warn_percent {
                    self.logger
                        .warn(format!("high cpu usage: {cpu:.1}% > {:.1}%", probe.cpu_warn_percent));
                }
            }
            if let Some(resident) = snapshot.resident_bytes {
                if resident > probe.memory_warn_bytes {
                    self.logger.warn(format!(
                        "high resident memory: {resident} bytes > {} bytes",
                        probe.memory_warn_bytes
                    ));
                }
            }
            if snapshot.queue_depth > probe.queue_warn_depth {
                self.logger.warn(format!(
                    "high queue depth: {} > {}",
                    snapshot.queue_depth, probe.queue_warn_depth
                ));
            }
            if let Some(callback) = &probe.health_callback {
                callback();
            }
        }

        if probe.backpressure_check {
            let depth = probe
                .queue_size_fn
                .as_ref()
                .map(|f| f())
                .unwrap_or_else(|| self.pool.pending());
            if depth > probe.backpressure_threshold {
                self.logger.warn(format!(
                    "backpressure: queue depth {depth} exceeds threshold {} (workers={})",
                    probe.backpressure_threshold,
                    self.pool.size(),
                ));
                if let Some(callback) = &probe.backpressure_callback {
                    callback();
                }
            }
        }
    }
}

/// Cumulative CPU time of this process, from `/proc/self/stat`.
#[cfg(target_os = "linux")]
fn process_cpu_time() -> Option<Duration> {
    // utime and stime are the 12th and 13th fields after the comm field,
    // which is parenthesized and may contain spaces.
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    let rest = stat.rfind(')').map(|i| &stat[i + 1..])?;
    let mut fields = rest.split_whitespace();
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    // Kernel clock ticks; 100 Hz on every mainstream Linux build.
    Some(Duration::from_millis((utime + stime) * 10))
}

#[cfg(not(target_os = "linux"))]
fn process_cpu_time() -> Option<Duration> {
    None
}

/// Resident set size in bytes, from `/proc/self/statm`.
#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}
