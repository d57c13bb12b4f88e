//! # Startup orchestration: synchronous and staged-asynchronous.
//!
//! Two ways to bring a service online:
//!
//! - [`ServiceHost::start`] does everything in order and returns when the
//!   service is up (or the first step failed).
//! - [`ServiceHost::start_infrastructure_async`] +
//!   [`ServiceHost::complete_startup_async`] split the sequence so the
//!   service can load data and warm caches while the bus connection,
//!   scheduler, and tracing come up in the background.
//!
//! ## Rules
//! - A failed step aborts startup and surfaces as [`RuntimeError`]; the
//!   service never reports healthy in that case.
//! - Handler subscriptions are created in the completion phase, after the
//!   bus connection exists.
//! - The final health check gates success: an unhealthy service fails
//!   `start` even though infrastructure came up.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::InitConfig;
use crate::error::RuntimeError;
use crate::host::{signals, ServiceHost};

impl ServiceHost {
    /// Synchronous startup: infrastructure, handlers, scheduler, permanent
    /// tasks, final health check.
    pub async fn start(self: &Arc<Self>, config: InitConfig) -> Result<(), RuntimeError> {
        self.init_infrastructure(&config).await?;
        self.complete_startup_async(config).await
    }

    /// Brings up the infrastructure in a background task and returns its
    /// completion token. Await the handle, then call
    /// [`complete_startup_async`](Self::complete_startup_async).
    pub fn start_infrastructure_async(
        self: &Arc<Self>,
        config: InitConfig,
    ) -> JoinHandle<Result<(), RuntimeError>> {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let result = host.init_infrastructure(&config).await;
            if let Err(e) = &result {
                host.logger
                    .error(format!("infrastructure startup failed: {e}"));
            }
            result
        })
    }

    /// Finishes a staged startup: subscribes registered handlers, attaches
    /// the scheduler's maintenance tasks, starts permanent tasks, and runs
    /// the final health check.
    pub async fn complete_startup_async(
        self: &Arc<Self>,
        config: InitConfig,
    ) -> Result<(), RuntimeError> {
        if !self.infra_ready.load(Ordering::Acquire) {
            return Err(RuntimeError::StartupSequence {
                reason: "infrastructure startup has not completed".to_string(),
            });
        }

        self.dispatcher.subscribe_registered().await;

        if config.enable_scheduler && config.enable_cache && config.enable_auto_cache_cleanup {
            self.schedule_cache_cleanup(&config);
        }
        if config.enable_permanent_tasks {
            self.start_permanent_tasks(&config);
        }

        if !self.is_healthy() {
            return Err(RuntimeError::HealthCheckFailed {
                status: self.status().to_string(),
            });
        }

        self.logger
            .info(format!("{} startup complete", self.identity.service_name));
        Ok(())
    }

    /// Infrastructure phase: bus, durable layer, tracing mode, cache
    /// defaults, signal handlers, config watch, scheduler.
    pub(crate) async fn init_infrastructure(
        self: &Arc<Self>,
        config: &InitConfig,
    ) -> Result<(), RuntimeError> {
        let url = config.effective_bus_url();
        self.bus
            .connect(&url)
            .await
            .map_err(|e| RuntimeError::InitFailure {
                reason: format!("bus connect to {url}: {e}"),
            })?;
        self.logger.info(format!("connected to bus at {url}"));

        if config.enable_durable_stream {
            self.bus
                .open_durable_context()
                .await
                .map_err(|e| RuntimeError::InitFailure {
                    reason: format!("durable stream: {e}"),
                })?;
            self.logger.debug("durable stream context attached");
        }

        self.configure_tracing(config)?;

        if config.enable_cache {
            self.apply_cache_defaults(config);
        }

        self.install_signal_listeners();

        self.settings.start_watch();
        {
            let logger = self.logger.child("config");
            self.settings.on_reload(Box::new(move || {
                logger.info("configuration reloaded");
            }));
        }

        if config.enable_scheduler {
            self.scheduler.start().await;
        }

        self.infra_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Applies the observability mode: performance mode keeps the fast
    /// publish path; otherwise the tracer is initialized and the traced
    /// path switched in.
    fn configure_tracing(&self, config: &InitConfig) -> Result<(), RuntimeError> {
        if config.enable_performance_mode {
            self.disable_tracing();
            self.logger
                .info("performance mode enabled, tracing disabled");
            return Ok(());
        }

        let endpoint = config.effective_otlp_endpoint();
        self.tracer
            .initialize(&self.identity.service_name, &endpoint)
            .map_err(|e| RuntimeError::TracingInit {
                reason: e.to_string(),
            })?;
        self.enable_tracing();
        self.logger.info(format!("tracing enabled, exporting to {endpoint}"));
        Ok(())
    }

    /// Spawns the termination and `SIGHUP` listeners once per host.
    fn install_signal_listeners(self: &Arc<Self>) {
        if self.signals_installed.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if signals::wait_for_shutdown_signal().await.is_err() {
                return;
            }
            if let Some(host) = weak.upgrade() {
                host.logger.warn("termination signal received, stopping");
                host.stop();
            }
        });

        tokio::spawn(signals::watch_log_level_reload());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::{BusClient, MemoryBus};

    fn quiet_config() -> InitConfig {
        InitConfig {
            enable_permanent_tasks: false,
            enable_auto_cache_cleanup: false,
            ..InitConfig::default()
        }
    }

    fn host_with_bus() -> Arc<ServiceHost> {
        ServiceHost::builder("svc-start", "StartupDemo")
            .bus(Arc::new(MemoryBus::new()) as Arc<dyn BusClient>)
            .worker_threads(2)
            .build()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn synchronous_start_reaches_healthy() {
        let host = host_with_bus();
        host.start(quiet_config()).await.unwrap();
        assert!(host.is_healthy());
        assert_eq!(host.status(), "healthy");
        assert!(host.is_tracing_enabled());
        host.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn performance_mode_keeps_tracing_off() {
        let host = host_with_bus();
        let config = InitConfig {
            enable_performance_mode: true,
            ..quiet_config()
        };
        host.start(config).await.unwrap();
        assert!(!host.is_tracing_enabled());
        host.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn staged_startup_in_order_succeeds() {
        let host = host_with_bus();
        let infra = host.start_infrastructure_async(quiet_config());

        // Domain initialization would run here, in parallel.
        tokio::time::sleep(Duration::from_millis(10)).await;

        infra.await.expect("join").expect("infrastructure");
        host.complete_startup_async(quiet_config()).await.unwrap();
        assert!(host.is_healthy());
        host.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn completion_before_infrastructure_is_rejected() {
        let host = host_with_bus();
        let err = host.complete_startup_async(quiet_config()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::StartupSequence { .. }));
        host.shutdown().await;
    }
}
