//! # servicekit
//!
//! **servicekit** is an in-process runtime core for network microservices
//! that communicate over a pub/sub message bus. A service built on it
//! consists only of message handlers and business logic; the runtime
//! provides the shared infrastructure.
//!
//! ## Features
//!
//! | Area                | Description                                                       | Key types / traits                          |
//! |---------------------|-------------------------------------------------------------------|---------------------------------------------|
//! | **Dispatch**        | Subject subscriptions, typed handlers, per-message spans.         | [`Dispatcher`], [`Registrations`], [`BusMessage`] |
//! | **Worker pool**     | Fixed workers draining one FIFO queue, panic containment.         | [`WorkerPool`]                              |
//! | **Caching**         | Named, typed, thread-safe TTL+LRU caches with statistics.         | [`Cache`], [`CacheRegistry`]                |
//! | **Scheduling**      | Recurring / one-shot / conditional tasks on the shared pool.      | [`Scheduler`], [`TaskConfig`]               |
//! | **Publishing**      | Hot-path-switchable fast/traced outbound publish.                 | [`Publisher`]                               |
//! | **Tracing**         | W3C trace-context propagation, pluggable tracer.                  | [`TraceContext`], [`Tracer`], [`SpanHandle`] |
//! | **Logging**         | Correlated structured logs with hierarchical child loggers.       | [`CorrelatedLogger`], [`LogLevel`]          |
//! | **Lifecycle**       | Staged startup, permanent maintenance, graceful shutdown.         | [`ServiceHost`], [`InitConfig`]             |
//! | **Errors**          | Typed errors with stable labels for logs and metrics.             | [`RuntimeError`], [`TaskError`], [`CacheError`] |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use servicekit::{
//!     BusClient, BusMessage, InitConfig, MemoryBus, Registrations, Routing, ServiceHost,
//! };
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping { text: String }
//!
//! impl BusMessage for Ping {
//!     fn type_name() -> &'static str { "demo.Ping" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Arc::new(MemoryBus::new());
//!     let host = ServiceHost::builder("svc-demo-001", "DemoService")
//!         .bus(bus as Arc<dyn BusClient>)
//!         .build();
//!
//!     host.register_handlers(Registrations::new().on::<Ping, _, _>(
//!         Routing::Broadcast,
//!         |ping: Ping| async move { println!("ping: {}", ping.text); },
//!     ))
//!     .await?;
//!
//!     host.start(InitConfig::default()).await?;
//!     host.publish_broadcast(&Ping { text: "hello".into() }).await;
//!
//!     host.wait_until_stopped().await;
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ---

pub mod bus;
pub mod cache;
mod config;
pub mod dispatch;
mod error;
pub mod host;
pub mod logging;
pub mod pool;
pub mod publish;
pub mod sched;
pub mod settings;
pub mod trace;

// ---- Public re-exports ----

pub use bus::{BusClient, BusError, Delivery, Headers, MemoryBus, SubscriptionCallback};
pub use cache::{Cache, CacheMaintenance, CacheRegistry, CacheStats};
pub use config::{InitConfig, MaintenanceCallback, QueueSizeFn};
pub use dispatch::{BusMessage, Dispatcher, Registrations, Routing, TraceMetadata};
pub use error::{CacheError, CodecError, RuntimeError, TaskError};
pub use host::{HealthSnapshot, ServiceHost, ServiceHostBuilder, ServiceIdentity};
pub use logging::{CorrelatedLogger, LogLevel};
pub use pool::WorkerPool;
pub use publish::Publisher;
pub use sched::{ExecutionMode, Scheduler, SchedulerStats, TaskConfig, TaskId, TaskStats};
pub use settings::{MapSettings, ReloadCallback, Settings, SettingsExt};
pub use trace::{RuntimeTracer, SpanHandle, SpanStatus, TraceContext, Tracer};
