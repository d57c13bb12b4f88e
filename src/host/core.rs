//! # Host construction, component access, and lifecycle state.
//!
//! Construction wires the component graph and leaves the service in the
//! `running` state with tracing off; [`startup`](crate::host::ServiceHost::start)
//! brings the infrastructure online. The host is always handled as
//! `Arc<ServiceHost>` — timed tasks and signal listeners keep `Weak`
//! backreferences only.

use std::future::Future;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusClient, MemoryBus};
use crate::cache::{Cache, CacheRegistry};
use crate::config::InitConfig;
use crate::dispatch::{BusMessage, Dispatcher, Registrations, Routing};
use crate::error::{CacheError, RuntimeError};
use crate::host::maintenance::CpuTracker;
use crate::logging::CorrelatedLogger;
use crate::pool::WorkerPool;
use crate::publish::Publisher;
use crate::sched::{Scheduler, TaskId};
use crate::settings::{MapSettings, Settings, SettingsExt};
use crate::trace::{RuntimeTracer, Tracer};

/// Immutable identity of a service instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Point-to-point addressable uid.
    pub uid: String,
    /// Human-facing service name.
    pub service_name: String,
}

/// Builder for a [`ServiceHost`] with pluggable collaborators.
pub struct ServiceHostBuilder {
    uid: String,
    service_name: String,
    bus: Option<Arc<dyn BusClient>>,
    settings: Option<Arc<dyn Settings>>,
    tracer: Option<Arc<dyn Tracer>>,
    worker_threads: Option<usize>,
}

impl ServiceHostBuilder {
    /// Replaces the default in-memory bus client.
    pub fn bus(mut self, bus: Arc<dyn BusClient>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replaces the default empty settings table.
    pub fn settings(mut self, settings: Arc<dyn Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Replaces the built-in tracer.
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Overrides the worker-pool size (otherwise the `threads` setting,
    /// otherwise the machine's available parallelism).
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Wires the component graph and returns the host, already in the
    /// `running` state with tracing off.
    pub fn build(self) -> Arc<ServiceHost> {
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(MapSettings::new()) as Arc<dyn Settings>);
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(MemoryBus::new()) as Arc<dyn BusClient>);
        let tracer = self
            .tracer
            .unwrap_or_else(|| Arc::new(RuntimeTracer::new()) as Arc<dyn Tracer>);

        let default_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let threads = self
            .worker_threads
            .unwrap_or_else(|| settings.get("threads", default_threads));

        let identity = ServiceIdentity {
            uid: self.uid,
            service_name: self.service_name,
        };
        let logger = CorrelatedLogger::new(identity.service_name.clone());
        let running = Arc::new(AtomicBool::new(true));

        let pool = Arc::new(WorkerPool::new(threads));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&pool)));
        let dispatcher = Dispatcher::new(
            identity.uid.clone(),
            Arc::clone(&bus),
            Arc::clone(&pool),
            Arc::clone(&tracer),
            logger.clone(),
            Arc::clone(&running),
        );
        let publisher = Arc::new(Publisher::new(
            identity.uid.clone(),
            Arc::clone(&bus),
            Arc::clone(&tracer),
            logger.clone(),
        ));

        logger.info(format!(
            "service host initialized with {threads} worker threads"
        ));

        Arc::new(ServiceHost {
            identity,
            settings,
            bus,
            tracer,
            logger,
            pool,
            caches: Arc::new(CacheRegistry::new()),
            scheduler,
            dispatcher,
            publisher,
            running,
            tracing_enabled: AtomicBool::new(false),
            permanent_tasks_running: AtomicBool::new(false),
            permanent_task_id: Mutex::new(None),
            cleanup_task_id: Mutex::new(None),
            infra_ready: AtomicBool::new(false),
            signals_installed: AtomicBool::new(false),
            shutdown_started: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
            cpu: Mutex::new(CpuTracker::new()),
            cache_defaults: Mutex::new((1000, None)),
        })
    }
}

/// In-process runtime hosting one bus-connected service.
pub struct ServiceHost {
    pub(crate) identity: ServiceIdentity,
    pub(crate) settings: Arc<dyn Settings>,
    pub(crate) bus: Arc<dyn BusClient>,
    pub(crate) tracer: Arc<dyn Tracer>,
    pub(crate) logger: CorrelatedLogger,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) caches: Arc<CacheRegistry>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) publisher: Arc<Publisher>,

    /// Gates dispatch and submission; flipped by stop/shutdown/signals.
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) tracing_enabled: AtomicBool,
    pub(crate) permanent_tasks_running: AtomicBool,
    pub(crate) permanent_task_id: Mutex<Option<TaskId>>,
    pub(crate) cleanup_task_id: Mutex<Option<TaskId>>,
    pub(crate) infra_ready: AtomicBool,
    pub(crate) signals_installed: AtomicBool,
    pub(crate) shutdown_started: AtomicBool,
    /// Cancelled when the service leaves the running state.
    pub(crate) stop_token: CancellationToken,
    pub(crate) cpu: Mutex<CpuTracker>,
    /// `(capacity, ttl)` applied by [`create_cache`](Self::create_cache).
    pub(crate) cache_defaults: Mutex<(usize, Option<Duration>)>,
}

impl ServiceHost {
    /// Starts a builder for a host with the given identity.
    pub fn builder(
        uid: impl Into<String>,
        service_name: impl Into<String>,
    ) -> ServiceHostBuilder {
        ServiceHostBuilder {
            uid: uid.into(),
            service_name: service_name.into(),
            bus: None,
            settings: None,
            tracer: None,
            worker_threads: None,
        }
    }

    /// Point-to-point addressable uid of this instance.
    pub fn uid(&self) -> &str {
        &self.identity.uid
    }

    /// Human-facing service name.
    pub fn service_name(&self) -> &str {
        &self.identity.service_name
    }

    /// Full identity.
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Root correlated logger of this service.
    pub fn logger(&self) -> &CorrelatedLogger {
        &self.logger
    }

    /// Shared worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Cache registry.
    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    /// Task scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Message dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Outbound publisher.
    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Whether the service is in the running state.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Leaves the running state without tearing anything down; the full
    /// [`shutdown`](Self::shutdown) sequence still applies.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.stop_token.cancel();
    }

    /// Completes when the service leaves the running state (signal,
    /// `stop`, or `shutdown`).
    pub async fn wait_until_stopped(&self) {
        self.stop_token.cancelled().await;
    }

    /// Running and connected to the bus.
    pub fn is_healthy(&self) -> bool {
        self.is_running() && self.bus.is_connected()
    }

    /// Coarse service status for health responses.
    pub fn status(&self) -> &'static str {
        if !self.is_running() {
            "shutting_down"
        } else if !self.bus.is_connected() {
            "disconnected"
        } else {
            "healthy"
        }
    }

    /// Typed configuration lookup with a default.
    pub fn config_get<T: FromStr>(&self, key: &str, default: T) -> T {
        self.settings.get(key, default)
    }

    /// Whether publishes currently take the traced path.
    pub fn is_tracing_enabled(&self) -> bool {
        self.tracing_enabled.load(Ordering::Acquire)
    }

    /// Switches publishes to the traced path. Takes effect on the next
    /// publish call.
    pub fn enable_tracing(&self) {
        self.tracing_enabled.store(true, Ordering::Release);
        self.publisher.enable_tracing();
    }

    /// Switches publishes to the fast path. Takes effect on the next
    /// publish call.
    pub fn disable_tracing(&self) {
        self.tracing_enabled.store(false, Ordering::Release);
        self.publisher.disable_tracing();
    }

    /// Registers one typed message handler.
    pub async fn register_message<T, F, Fut>(self: &Arc<Self>, routing: Routing, handler: F)
    where
        T: BusMessage,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.register::<T, F, Fut>(routing, handler).await;
    }

    /// Registers a handler batch atomically.
    pub async fn register_handlers(self: &Arc<Self>, batch: Registrations) -> Result<(), RuntimeError> {
        self.dispatcher.register_batch(batch).await
    }

    /// Publishes to every subscriber of the record's type.
    pub async fn publish_broadcast<T: BusMessage>(&self, message: &T) {
        self.publisher.publish_broadcast(message).await;
    }

    /// Publishes to the service with the given uid.
    pub async fn publish_point_to_point<T: BusMessage>(&self, target_uid: &str, message: &T) {
        self.publisher.publish_point_to_point(target_uid, message).await;
    }

    /// Submits a job to the worker pool; `false` once shutdown has begun.
    pub fn submit_task<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pool.submit(job)
    }

    /// Creates (or retrieves) a typed cache using the host's configured
    /// default capacity and TTL.
    pub fn create_cache<K, V>(&self, name: &str) -> Result<Arc<Cache<K, V>>, CacheError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let (capacity, ttl) = *self.cache_defaults.lock();
        self.caches.create(name, capacity, ttl)
    }

    /// Creates (or retrieves) a typed cache with explicit sizing.
    pub fn create_cache_sized<K, V>(
        &self,
        name: &str,
        capacity: usize,
        ttl: Option<Duration>,
    ) -> Result<Arc<Cache<K, V>>, CacheError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.caches.create(name, capacity, ttl)
    }

    /// Typed cache lookup; `None` when absent or differently typed.
    pub fn get_cache<K, V>(&self, name: &str) -> Option<Arc<Cache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.caches.get(name)
    }

    pub(crate) fn apply_cache_defaults(&self, config: &InitConfig) {
        *self.cache_defaults.lock() = (config.default_cache_size, config.default_cache_ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn construction_leaves_host_running_with_tracing_off() {
        let host = ServiceHost::builder("svc-1", "Demo").worker_threads(2).build();
        assert!(host.is_running());
        assert!(!host.is_tracing_enabled());
        assert_eq!(host.status(), "disconnected");
        assert_eq!(host.uid(), "svc-1");
        host.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_flips_running_without_teardown() {
        let host = ServiceHost::builder("svc-1", "Demo").worker_threads(2).build();
        host.stop();
        assert!(!host.is_running());
        assert_eq!(host.status(), "shutting_down");
        // The pool is still alive until shutdown.
        assert!(host.submit_task(async {}));
        host.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cache_convenience_uses_host_defaults() {
        let host = ServiceHost::builder("svc-1", "Demo").worker_threads(2).build();
        host.apply_cache_defaults(&InitConfig {
            default_cache_size: 3,
            default_cache_ttl: None,
            ..InitConfig::default()
        });

        let cache = host.create_cache::<u32, String>("sessions").unwrap();
        assert_eq!(cache.max_size(), 3);
        assert!(host.get_cache::<u32, String>("sessions").is_some());
        assert!(host.get_cache::<String, String>("sessions").is_none());
        host.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn config_lookup_reads_settings() {
        let settings = Arc::new(MapSettings::from_pairs([("portfolio.default_value", "250000")]));
        let host = ServiceHost::builder("svc-1", "Demo")
            .settings(settings as Arc<dyn Settings>)
            .worker_threads(2)
            .build();
        assert_eq!(host.config_get("portfolio.default_value", 0u64), 250000);
        assert_eq!(host.config_get("missing", 17u64), 17);
        host.shutdown().await;
    }
}
