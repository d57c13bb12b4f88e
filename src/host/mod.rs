//! # Service host: lifecycle controller and component owner.
//!
//! [`ServiceHost`] owns one of everything — worker pool, cache registry,
//! scheduler, dispatcher, publisher — and orchestrates startup, the
//! permanent maintenance loop, and signal-driven graceful shutdown.
//!
//! ## Architecture
//! ```text
//! ServiceHost
//!   ├── WorkerPool      handler + scheduler execution
//!   ├── CacheRegistry   named typed caches
//!   ├── Scheduler       timed tasks (cache sweep, maintenance)
//!   ├── Dispatcher      subscriptions, typed dispatch
//!   ├── Publisher       fast/traced outbound publish
//!   └── lifecycle       running flag, signals, shutdown sequence
//! ```
//!
//! Components never own the host back; timed tasks that need it hold a
//! `Weak` reference and upgrade per tick.

mod core;
mod maintenance;
mod shutdown;
mod signals;
mod startup;

pub use core::{ServiceHost, ServiceHostBuilder, ServiceIdentity};
pub use maintenance::HealthSnapshot;
pub use signals::wait_for_shutdown_signal;
