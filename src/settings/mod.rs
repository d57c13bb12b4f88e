//! # Configuration collaborator.
//!
//! The runtime only needs key/value lookup with typed defaults and reload
//! notification; parsing and file watching belong to the host application
//! (or an external crate). [`Settings`] is that seam, [`SettingsExt`]
//! layers the typed `get` on top, and [`MapSettings`] is the shipped
//! table-backed implementation used by tests, demos, and services that
//! configure themselves from the environment.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

/// Callback invoked after the underlying configuration changed.
pub type ReloadCallback = Box<dyn Fn() + Send + Sync>;

/// # Key/value configuration source.
pub trait Settings: Send + Sync + 'static {
    /// Raw string lookup; `None` when the key is absent.
    fn get_raw(&self, key: &str) -> Option<String>;

    /// Registers a callback fired on every reload.
    fn on_reload(&self, callback: ReloadCallback);

    /// Begins observing the underlying source.
    fn start_watch(&self);

    /// Stops observing the underlying source. Idempotent.
    fn stop_watch(&self);
}

/// Typed lookup with defaults, for any [`Settings`] implementation.
pub trait SettingsExt: Settings {
    /// Parses the value under `key`, falling back to `default` when the
    /// key is absent or unparseable.
    fn get<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get_raw(key)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(default)
    }
}

impl<S: Settings + ?Sized> SettingsExt for S {}

/// Table-backed settings with manual reload.
///
/// `set` + [`trigger_reload`](MapSettings::trigger_reload) stand in for a
/// file watcher; callbacks only fire while watching is active.
#[derive(Default)]
pub struct MapSettings {
    values: RwLock<HashMap<String, String>>,
    callbacks: Mutex<Vec<ReloadCallback>>,
    watching: AtomicBool,
}

impl MapSettings {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let settings = Self::new();
        {
            let mut values = settings.values.write();
            for (k, v) in pairs {
                values.insert(k.into(), v.into());
            }
        }
        settings
    }

    /// Inserts or replaces a value. Does not notify; call
    /// [`trigger_reload`](MapSettings::trigger_reload) when a batch of
    /// changes is complete.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Fires the registered reload callbacks (while watching).
    pub fn trigger_reload(&self) {
        if !self.watching.load(Ordering::Acquire) {
            return;
        }
        for callback in self.callbacks.lock().iter() {
            callback();
        }
    }
}

impl Settings for MapSettings {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn on_reload(&self, callback: ReloadCallback) {
        self.callbacks.lock().push(callback);
    }

    fn start_watch(&self) {
        self.watching.store(true, Ordering::Release);
    }

    fn stop_watch(&self) {
        self.watching.store(false, Ordering::Release);
    }
}
