//! # Dispatcher: subject subscriptions and per-message processing.
//!
//! The dispatcher owns the `type name -> handler` table and the bus
//! subscriptions behind it. Inbound messages arrive on a bus-owned task;
//! the callback does only O(µs) work before handing off:
//!
//! ## Architecture
//! ```text
//! bus callback ─► extract trace headers
//!              ─► open receive span, request-scoped logger
//!              ─► submit to worker pool ──► decode payload
//!                                           │  └ decode error: log, count,
//!                                           │    span error, handler skipped
//!                                           └► run handler (panic contained)
//!                                              close span ok/error
//! ```
//!
//! ## Rules
//! - Registration is idempotent per `(type, routing)`: re-registration
//!   replaces the handler.
//! - Batch registration validates up front and applies all-or-none.
//! - One subscription per subject, however often a type is re-registered.
//! - New work is gated on the lifecycle `running` flag; in-flight handlers
//!   are awaited by the worker-pool drain during shutdown.
//! - Handler panics never escape the worker job.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::bus::{subject, BusClient, Delivery, Headers};
use crate::dispatch::message::BusMessage;
use crate::dispatch::registrations::{HandlerFn, Registration, Registrations, Routing};
use crate::error::RuntimeError;
use crate::logging::CorrelatedLogger;
use crate::pool::WorkerPool;
use crate::trace::{SpanStatus, TraceContext, Tracer};

/// Entry in the handler table.
#[derive(Clone)]
struct HandlerEntry {
    routing: Routing,
    handler: HandlerFn,
}

/// Subject-based subscription and typed handler dispatch.
pub struct Dispatcher {
    uid: String,
    bus: Arc<dyn BusClient>,
    pool: Arc<WorkerPool>,
    tracer: Arc<dyn Tracer>,
    logger: CorrelatedLogger,
    /// Shared with the host lifecycle; gates new submissions.
    running: Arc<AtomicBool>,
    handlers: RwLock<HashMap<&'static str, HandlerEntry>>,
    /// Subjects already subscribed on the bus.
    subscribed: Mutex<HashSet<String>>,
    decode_failures: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new(
        uid: impl Into<String>,
        bus: Arc<dyn BusClient>,
        pool: Arc<WorkerPool>,
        tracer: Arc<dyn Tracer>,
        logger: CorrelatedLogger,
        running: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            uid: uid.into(),
            bus,
            pool,
            tracer,
            logger: logger.child("dispatcher"),
            running,
            handlers: RwLock::new(HashMap::new()),
            subscribed: Mutex::new(HashSet::new()),
            decode_failures: AtomicU64::new(0),
        })
    }

    /// Registers one typed handler. When the bus is already connected the
    /// matching subscription is created immediately; otherwise it is
    /// deferred to [`subscribe_registered`](Self::subscribe_registered).
    pub async fn register<T, F, Fut>(self: &Arc<Self>, routing: Routing, handler: F)
    where
        T: BusMessage,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let batch = Registrations::new().on::<T, F, Fut>(routing, handler);
        // A single-entry batch cannot fail validation.
        let _ = self.register_batch(batch).await;
    }

    /// Applies a handler batch atomically: the whole batch is validated
    /// before any entry lands in the table.
    pub async fn register_batch(self: &Arc<Self>, batch: Registrations) -> Result<(), RuntimeError> {
        batch
            .validate()
            .map_err(|reason| RuntimeError::InvalidRegistration { reason })?;

        {
            let mut handlers = self.handlers.write();
            for Registration {
                type_name,
                routing,
                handler,
            } in batch.entries.iter().cloned()
            {
                handlers.insert(type_name, HandlerEntry { routing, handler });
            }
        }
        for entry in &batch.entries {
            self.logger
                .debug(format!("registered handler for {}", entry.type_name));
        }

        if self.bus.is_connected() {
            self.subscribe_registered().await;
        }
        Ok(())
    }

    /// Ensures a bus subscription exists for every registered handler.
    /// Idempotent per subject; called from the host once the bus is up.
    pub async fn subscribe_registered(self: &Arc<Self>) {
        let wanted: Vec<String> = {
            let handlers = self.handlers.read();
            handlers
                .iter()
                .map(|(type_name, entry)| self.subject_for(type_name, entry.routing))
                .collect()
        };

        for subject_name in wanted {
            if !self.subscribed.lock().insert(subject_name.clone()) {
                continue;
            }
            let me = Arc::clone(self);
            let callback = Arc::new(move |delivery: Delivery| {
                let Delivery {
                    subject: msg_subject,
                    headers,
                    payload,
                } = delivery;
                let Some(type_name) = subject::type_name_of(&msg_subject, &me.uid) else {
                    return;
                };
                me.receive(type_name, headers.as_ref(), payload);
            });

            match self.bus.subscribe(&subject_name, callback).await {
                Ok(()) => self.logger.debug(format!("subscribed to {subject_name}")),
                Err(e) => {
                    self.subscribed.lock().remove(&subject_name);
                    self.logger
                        .error(format!("failed to subscribe to {subject_name}: {e}"));
                }
            }
        }
    }

    /// Entry point used by bus callback adapters. Must not block: opens
    /// the receive span and hands the rest to the worker pool.
    pub fn receive(self: &Arc<Self>, type_name: &str, headers: Option<&Headers>, payload: Vec<u8>) {
        if !self.running.load(Ordering::Acquire) || self.pool.is_shutdown() {
            return;
        }

        let entry = self.handlers.read().get(type_name).cloned();
        let Some(entry) = entry else {
            self.logger
                .warn(format!("no handler registered for message type {type_name}"));
            return;
        };

        let parent = headers.map(TraceContext::extract).unwrap_or_default();
        let mut span = self
            .tracer
            .start_span(&format!("receive {type_name}"), Some(&parent));
        span.set_attributes([
            ("message.type", type_name.to_string()),
            ("routing", entry.routing.as_label().to_string()),
            ("service.uid", self.uid.clone()),
        ]);

        let request_logger = self.logger.request();
        let me = Arc::clone(self);
        let type_name = type_name.to_string();

        // If the pool begins draining between the check above and this
        // submit, the job future is dropped and the span closes unset.
        self.pool.submit(async move {
            let invocation = (entry.handler)(&payload);
            drop(payload);

            let fut = match invocation {
                Err(decode_error) => {
                    me.decode_failures.fetch_add(1, Ordering::Relaxed);
                    request_logger.error(format!("dropping {type_name}: {decode_error}"));
                    span.set_status(SpanStatus::Error, Some(&decode_error.to_string()));
                    span.end();
                    return;
                }
                Ok(fut) => fut,
            };

            let started = Instant::now();
            let outcome = futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(fut)).await;
            let elapsed = started.elapsed();
            match outcome {
                Ok(()) => {
                    request_logger.debug(format!("handled {type_name} in {elapsed:?}"));
                    span.set_status(SpanStatus::Ok, None);
                }
                Err(_) => {
                    request_logger.error(format!("handler for {type_name} panicked after {elapsed:?}"));
                    span.set_status(SpanStatus::Error, Some("handler panicked"));
                }
            }
            span.end();
        });
    }

    /// Count of messages dropped because their payload failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Registered type names, sorted.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.handlers.read().keys().copied().collect();
        types.sort_unstable();
        types
    }

    fn subject_for(&self, type_name: &str, routing: Routing) -> String {
        match routing {
            Routing::Broadcast => subject::broadcast(type_name),
            Routing::PointToPoint => subject::direct(&self.uid, type_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::bus::MemoryBus;
    use crate::trace::RuntimeTracer;

    #[derive(Serialize, Deserialize)]
    struct Ping {
        text: String,
    }

    impl BusMessage for Ping {
        fn type_name() -> &'static str {
            "test.Ping"
        }
    }

    struct Fixture {
        bus: Arc<MemoryBus>,
        pool: Arc<WorkerPool>,
        tracer: Arc<RuntimeTracer>,
        dispatcher: Arc<Dispatcher>,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(MemoryBus::new());
        bus.connect("memory://local").await.unwrap();
        let pool = Arc::new(WorkerPool::new(2));
        let tracer = Arc::new(RuntimeTracer::new());
        let dispatcher = Dispatcher::new(
            "svc-test",
            Arc::clone(&bus) as Arc<dyn BusClient>,
            Arc::clone(&pool),
            Arc::clone(&tracer) as Arc<dyn Tracer>,
            CorrelatedLogger::new("test"),
            Arc::new(AtomicBool::new(true)),
        );
        Fixture {
            bus,
            pool,
            tracer,
            dispatcher,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn registered_handler_receives_published_message() {
        let fx = fixture().await;
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_handler = Arc::clone(&seen);

        fx.dispatcher
            .register::<Ping, _, _>(Routing::Broadcast, move |ping: Ping| {
                let seen = Arc::clone(&seen_handler);
                async move {
                    assert_eq!(ping.text, "hello");
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        let payload = Ping {
            text: "hello".to_string(),
        }
        .encode()
        .unwrap();
        fx.bus
            .publish(&subject::broadcast("test.Ping"), payload)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        fx.pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn decode_failure_skips_handler_and_counts() {
        let fx = fixture().await;
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_handler = Arc::clone(&seen);

        fx.dispatcher
            .register::<Ping, _, _>(Routing::Broadcast, move |_ping: Ping| {
                let seen = Arc::clone(&seen_handler);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        fx.bus
            .publish(&subject::broadcast("test.Ping"), b"not json".to_vec())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(fx.dispatcher.decode_failures(), 1);
        assert_eq!(fx.tracer.spans_errored(), 1);

        fx.pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn handler_panic_is_contained() {
        let fx = fixture().await;

        fx.dispatcher
            .register::<Ping, _, _>(Routing::Broadcast, |_ping: Ping| async move {
                panic!("handler exploded");
            })
            .await;

        let payload = Ping {
            text: "x".to_string(),
        }
        .encode()
        .unwrap();
        fx.bus
            .publish(&subject::broadcast("test.Ping"), payload)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.tracer.spans_errored(), 1);
        // Pool still alive and usable afterwards.
        assert!(fx.pool.submit(async {}));

        fx.pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn duplicate_batch_entries_fail_validation_atomically() {
        let fx = fixture().await;

        let batch = Registrations::new()
            .on::<Ping, _, _>(Routing::Broadcast, |_: Ping| async {})
            .on::<Ping, _, _>(Routing::Broadcast, |_: Ping| async {});

        let err = fx.dispatcher.register_batch(batch).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidRegistration { .. }));
        assert!(fx.dispatcher.registered_types().is_empty());

        fx.pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn receive_is_gated_on_running() {
        let fx = fixture().await;
        let running = Arc::new(AtomicBool::new(true));
        let dispatcher = Dispatcher::new(
            "svc-gated",
            Arc::clone(&fx.bus) as Arc<dyn BusClient>,
            Arc::clone(&fx.pool),
            Arc::clone(&fx.tracer) as Arc<dyn Tracer>,
            CorrelatedLogger::new("test"),
            Arc::clone(&running),
        );

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_handler = Arc::clone(&seen);
        dispatcher
            .register::<Ping, _, _>(Routing::Broadcast, move |_: Ping| {
                let seen = Arc::clone(&seen_handler);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        running.store(false, Ordering::Release);
        let payload = Ping {
            text: "late".to_string(),
        }
        .encode()
        .unwrap();
        dispatcher.receive("test.Ping", None, payload);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        fx.pool.shutdown().await;
    }
}
