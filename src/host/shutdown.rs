//! # Coordinated graceful shutdown.
//!
//! One sequence, whoever triggers it (signal handler via
//! [`stop`](crate::host::ServiceHost::stop) + caller, or a direct call):
//!
//! 1. leave the running state (new dispatch and submissions refused)
//! 2. cancel the permanent maintenance and cache-cleanup tasks
//! 3. stop the configuration watcher
//! 4. drain the worker pool (in-flight and queued jobs finish)
//! 5. stop the scheduler dispatcher
//! 6. tear down the durable-stream context, then close the bus
//!
//! ## Rules
//! - Idempotent: the second call observes nothing left to do.
//! - Cooperative: nothing is interrupted, submissions are refused instead.
//! - [`shutdown_with_timeout`](crate::host::ServiceHost::shutdown_with_timeout)
//!   bounds the caller's wait; the sequence itself keeps finishing in the
//!   background when the bound elapses.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::host::ServiceHost;

impl ServiceHost {
    /// Runs the full shutdown sequence. Idempotent; concurrent callers
    /// after the first return immediately.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.logger.info("shutting down service host");

        self.running.store(false, Ordering::Release);
        self.stop_token.cancel();

        self.stop_permanent_tasks();
        self.settings.stop_watch();

        self.pool.shutdown().await;
        self.logger.debug("worker pool drained");

        self.scheduler.stop().await;
        self.logger.debug("scheduler stopped");

        self.bus.close_durable_context().await;
        self.bus.close().await;
        self.logger.info("service host shutdown complete");
    }

    /// Runs [`shutdown`](Self::shutdown) in a background task and waits at
    /// most `timeout` for it. Returns whether the sequence completed
    /// within the bound; on `false` the background task keeps finishing
    /// detached.
    pub async fn shutdown_with_timeout(self: &Arc<Self>, timeout: Duration) -> bool {
        let host = Arc::clone(self);
        let handle = tokio::spawn(async move { host.shutdown().await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => true,
            Err(_) => {
                self.logger
                    .warn(format!("graceful shutdown exceeded {timeout:?}, detaching"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::bus::{BusClient, MemoryBus};
    use crate::config::InitConfig;

    fn quiet_config() -> InitConfig {
        InitConfig {
            enable_permanent_tasks: false,
            enable_auto_cache_cleanup: false,
            ..InitConfig::default()
        }
    }

    fn host_with_bus(uid: &str) -> Arc<ServiceHost> {
        ServiceHost::builder(uid, "ShutdownDemo")
            .bus(Arc::new(MemoryBus::new()) as Arc<dyn BusClient>)
            .worker_threads(2)
            .build()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_is_idempotent() {
        let host = host_with_bus("svc-sd1");
        host.start(quiet_config()).await.unwrap();

        host.shutdown().await;
        let before = host.status();
        host.shutdown().await;
        assert_eq!(host.status(), before);
        assert!(!host.is_running());
        assert!(!host.submit_task(async {}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_drains_accepted_work() {
        let host = host_with_bus("svc-sd2");
        host.start(quiet_config()).await.unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let ran = Arc::clone(&ran);
            assert!(host.submit_task(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        host.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_with_timeout_bounds_the_wait() {
        let host = host_with_bus("svc-sd3");
        host.start(quiet_config()).await.unwrap();

        // A slow job keeps the pool drain busy past the bound.
        host.submit_task(async {
            tokio::time::sleep(Duration::from_millis(400)).await;
        });

        let started = Instant::now();
        let completed = host.shutdown_with_timeout(Duration::from_millis(50)).await;
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_millis(300));

        // The detached sequence still finishes.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!host.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_then_wait_until_stopped_completes() {
        let host = host_with_bus("svc-sd4");
        host.start(quiet_config()).await.unwrap();

        let waiter = {
            let host = Arc::clone(&host);
            tokio::spawn(async move { host.wait_until_stopped().await })
        };
        host.stop();
        waiter.await.unwrap();
        host.shutdown().await;
    }
}
