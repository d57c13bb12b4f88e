//! # Cross-platform OS signal handling.
//!
//! [`wait_for_shutdown_signal`] completes when the process receives a
//! termination signal; the host also listens for `SIGHUP` to re-read the
//! log level from the environment.
//!
//! ## Signals
//! **Unix platforms:**
//! - `SIGINT` (Ctrl-C in terminal)
//! - `SIGTERM` (default kill signal, used by systemd/Kubernetes)
//! - `SIGHUP` (re-read `LOG_LEVEL`, handled separately)
//!
//! **Windows platforms:**
//! - `Ctrl-C` via [`tokio::signal::ctrl_c`]

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal
/// registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal
/// registration fails.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Runs until process exit, re-reading the log level on every `SIGHUP`.
#[cfg(unix)]
pub(crate) async fn watch_log_level_reload() {
    use tokio::signal::unix::{signal, SignalKind};

    let Ok(mut sighup) = signal(SignalKind::hangup()) else {
        return;
    };
    while sighup.recv().await.is_some() {
        crate::logging::reload_level_from_env();
        tracing::info!("log level reloaded from environment");
    }
}

/// No hangup signal off Unix; nothing to watch.
#[cfg(not(unix))]
pub(crate) async fn watch_log_level_reload() {}
