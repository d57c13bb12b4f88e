//! # Named collection of heterogeneously-typed caches.
//!
//! [`CacheRegistry`] maps names to type-erased cache handles. Maintenance
//! (clear, sweep, stats) goes through the erased [`CacheMaintenance`]
//! capability; typed access goes through a checked downcast back to the
//! concrete [`Cache<K, V>`].
//!
//! ## Rules
//! - Creation is idempotent on name: matching types return the existing
//!   handle, mismatched types fail with `TypeMismatch`.
//! - All creation and lookup is linearized by one registry lock.
//! - Maintenance never needs to know the stored types.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::cache::{Cache, CacheStats};
use crate::error::CacheError;

/// Type-erased management capability over one cache instance.
///
/// Everything the registry needs for aggregate operations, independent of
/// the stored key/value types.
pub trait CacheMaintenance: Send + Sync + 'static {
    /// Registered name.
    fn name(&self) -> &str;
    /// Drops all entries.
    fn clear(&self);
    /// Live entry count.
    fn size(&self) -> usize;
    /// Configured capacity.
    fn max_size(&self) -> usize;
    /// Statistics snapshot.
    fn stats(&self) -> CacheStats;
    /// Eager expiry sweep; returns removed count.
    fn cleanup_expired(&self) -> usize;
    /// Escape hatch for the typed downcast.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<K, V> CacheMaintenance for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        Cache::name(self)
    }

    fn clear(&self) {
        Cache::clear(self)
    }

    fn size(&self) -> usize {
        Cache::size(self)
    }

    fn max_size(&self) -> usize {
        Cache::max_size(self)
    }

    fn stats(&self) -> CacheStats {
        Cache::stats(self)
    }

    fn cleanup_expired(&self) -> usize {
        Cache::cleanup_expired(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Named, heterogeneously-typed cache collection.
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<String, Arc<dyn CacheMaintenance>>>,
}

impl CacheRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a typed cache, or returns the existing handle when a cache
    /// with this name and exactly these types already exists.
    ///
    /// Fails with [`CacheError::TypeMismatch`] when the name is taken by a
    /// cache of different types, and with
    /// [`CacheError::InvalidCapacity`] when `capacity` is zero.
    pub fn create<K, V>(
        &self,
        name: &str,
        capacity: usize,
        default_ttl: Option<Duration>,
    ) -> Result<Arc<Cache<K, V>>, CacheError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let mut caches = self.caches.write();

        if let Some(existing) = caches.get(name) {
            return Arc::clone(existing)
                .as_any()
                .downcast::<Cache<K, V>>()
                .map_err(|_| CacheError::TypeMismatch {
                    name: name.to_string(),
                });
        }

        let cache = Arc::new(Cache::new(name, capacity, default_ttl)?);
        caches.insert(name.to_string(), Arc::clone(&cache) as Arc<dyn CacheMaintenance>);
        Ok(cache)
    }

    /// Typed lookup. Returns `None` when the name is absent or the stored
    /// types do not match.
    pub fn get<K, V>(&self, name: &str) -> Option<Arc<Cache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let caches = self.caches.read();
        let handle = caches.get(name)?;
        Arc::clone(handle).as_any().downcast::<Cache<K, V>>().ok()
    }

    /// Drops all entries of the named cache, if present.
    pub fn clear(&self, name: &str) {
        if let Some(cache) = self.caches.read().get(name) {
            cache.clear();
        }
    }

    /// Drops all entries of every cache.
    pub fn clear_all(&self) {
        for cache in self.caches.read().values() {
            cache.clear();
        }
    }

    /// Sweeps expired entries in every cache; returns the total removed.
    pub fn cleanup_expired_all(&self) -> usize {
        self.caches
            .read()
            .values()
            .map(|cache| cache.cleanup_expired())
            .sum()
    }

    /// Statistics snapshots of every cache, one per instance.
    pub fn all_stats(&self) -> Vec<CacheStats> {
        self.caches.read().values().map(|cache| cache.stats()).collect()
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    /// Returns whether no caches are registered.
    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Human-readable aggregate summary, one block per cache.
    pub fn stats_summary(&self) -> String {
        let mut out = String::from("cache statistics\n");
        let mut stats = self.all_stats();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        for s in stats {
            let _ = writeln!(
                out,
                "  {}: size={}/{} hit_rate={:.1}% hits={} misses={} evictions={} expirations={}",
                s.name,
                s.size,
                s.max_size,
                s.hit_rate * 100.0,
                s.hits,
                s.misses,
                s.evictions,
                s.expirations,
            );
        }
        out
    }
}
