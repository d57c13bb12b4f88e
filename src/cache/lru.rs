//! # One typed cache instance: LRU recency, TTL expiry, statistics.
//!
//! [`Cache`] keeps a bounded map of entries stamped with a monotonic touch
//! counter (recency order) and an optional expiry instant. Reads refresh
//! recency; writes at capacity first drop expired entries, then evict the
//! least-recently-used live entry.
//!
//! ## Rules
//! - `get`/`put` refresh recency; `contains` does not.
//! - An entry's expiry is only ever replaced by a later `put`, never
//!   retroactively shortened.
//! - `hits`/`misses` count `get` outcomes; an expired hit counts as a miss
//!   and one expiration.
//! - All operations go through one internal lock; [`Cache::stats`] is a
//!   coherent snapshot taken under that lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::CacheError;

/// Statistics snapshot of a single cache instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    /// Cache name (registry key).
    pub name: String,
    /// Live entry count at snapshot time.
    pub size: usize,
    /// Configured capacity.
    pub max_size: usize,
    /// Successful `get` lookups.
    pub hits: u64,
    /// Failed `get` lookups (absent or expired).
    pub misses: u64,
    /// Entries dropped to make room (capacity-driven).
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// `hits / (hits + misses)`, zero when no lookups happened.
    pub hit_rate: f64,
    /// `misses / (hits + misses)`, zero when no lookups happened.
    pub miss_rate: f64,
}

/// A stored value with its expiry and recency stamp.
#[derive(Debug)]
struct Slot<V> {
    value: V,
    /// `None` means the entry never expires.
    expires_at: Option<Instant>,
    /// Monotonic recency stamp; larger = more recently used.
    touched: u64,
}

impl<V> Slot<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct Inner<K, V> {
    map: HashMap<K, Slot<V>>,
    max_size: usize,
    /// Source of recency stamps.
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Drops every expired entry, returns how many were removed.
    fn cleanup_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, slot| !slot.is_expired(now));
        let removed = before - self.map.len();
        self.expirations += removed as u64;
        removed
    }

    /// Evicts the live entry with the oldest recency stamp.
    fn evict_lru(&mut self) {
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, slot)| slot.touched)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.map.remove(&key);
            self.evictions += 1;
        }
    }
}

/// Thread-safe LRU cache with per-entry TTL.
///
/// `K` and `V` are cloned on the way in and out; keep them cheap to clone
/// (or wrap values in `Arc`).
#[derive(Debug)]
pub struct Cache<K, V> {
    name: String,
    default_ttl: Option<Duration>,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// `default_ttl = None` means entries never expire unless a `put`
    /// supplies an explicit TTL. Fails with
    /// [`CacheError::InvalidCapacity`] when `capacity` is zero.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        default_ttl: Option<Duration>,
    ) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity);
        }
        Ok(Self {
            name: name.into(),
            default_ttl,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                max_size: capacity,
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        })
    }

    /// Cache name as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default TTL applied by [`Cache::put`].
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Looks up a live entry, refreshing its recency.
    ///
    /// An expired entry is removed on the spot and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        enum Lookup {
            Missing,
            Expired,
            Live,
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();

        let lookup = match inner.map.get(key) {
            None => Lookup::Missing,
            Some(slot) if slot.is_expired(now) => Lookup::Expired,
            Some(_) => Lookup::Live,
        };

        match lookup {
            Lookup::Missing => {
                inner.misses += 1;
                None
            }
            Lookup::Expired => {
                inner.map.remove(key);
                inner.expirations += 1;
                inner.misses += 1;
                None
            }
            Lookup::Live => {
                let stamp = inner.next_stamp();
                let value = inner.map.get_mut(key).map(|slot| {
                    slot.touched = stamp;
                    slot.value.clone()
                });
                inner.hits += 1;
                value
            }
        }
    }

    /// Inserts or replaces an entry using the cache's default TTL.
    pub fn put(&self, key: K, value: V) {
        self.insert(key, value, self.default_ttl);
    }

    /// Inserts or replaces an entry with an explicit TTL.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.insert(key, value, Some(ttl));
    }

    fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut inner = self.inner.lock();
        let stamp = inner.next_stamp();

        if let Some(slot) = inner.map.get_mut(&key) {
            slot.value = value;
            slot.expires_at = expires_at;
            slot.touched = stamp;
            return;
        }

        if inner.map.len() >= inner.max_size {
            inner.cleanup_expired(now);
            if inner.map.len() >= inner.max_size {
                inner.evict_lru();
            }
        }

        inner.map.insert(
            key,
            Slot {
                value,
                expires_at,
                touched: stamp,
            },
        );
    }

    /// Returns the cached value or computes, stores, and returns it.
    ///
    /// The lock is not held while `compute` runs; a concurrent `put` for
    /// the same key may race and the later write wins.
    pub fn compute_if_absent(&self, key: K, ttl: Option<Duration>, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.insert(key, value.clone(), ttl.or(self.default_ttl));
        value
    }

    /// Removes an entry; returns whether it was present (expired or not).
    pub fn remove(&self, key: &K) -> bool {
        self.inner.lock().map.remove(key).is_some()
    }

    /// Returns whether a live entry exists. Does not refresh recency and
    /// does not touch the hit/miss counters.
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner.map.get(key).is_some_and(|slot| !slot.is_expired(now))
    }

    /// Drops every entry. Counters are cumulative and survive the clear.
    pub fn clear(&self) {
        self.inner.lock().map.clear();
    }

    /// Live entry count (expired-but-unvisited entries included).
    pub fn size(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Configured capacity.
    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    /// Changes the capacity, evicting from the LRU tail while over the new
    /// limit. Fails with [`CacheError::InvalidCapacity`] for zero.
    pub fn resize(&self, capacity: usize) -> Result<(), CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity);
        }
        let mut inner = self.inner.lock();
        inner.max_size = capacity;
        while inner.map.len() > capacity {
            inner.evict_lru();
        }
        Ok(())
    }

    /// Eagerly drops expired entries; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.inner.lock().cleanup_expired(Instant::now())
    }

    /// Keys ordered most-recently-used first.
    pub fn keys_snapshot(&self) -> Vec<K> {
        let inner = self.inner.lock();
        let mut keyed: Vec<(&K, u64)> = inner
            .map
            .iter()
            .map(|(key, slot)| (key, slot.touched))
            .collect();
        keyed.sort_by(|a, b| b.1.cmp(&a.1));
        keyed.into_iter().map(|(key, _)| key.clone()).collect()
    }

    /// Coherent statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        let (hit_rate, miss_rate) = if lookups > 0 {
            (
                inner.hits as f64 / lookups as f64,
                inner.misses as f64 / lookups as f64,
            )
        } else {
            (0.0, 0.0)
        };
        CacheStats {
            name: self.name.clone(),
            size: inner.map.len(),
            max_size: inner.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            hit_rate,
            miss_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> Cache<u32, &'static str> {
        Cache::new("test", capacity, None).unwrap()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            Cache::<u32, u32>::new("bad", 0, None),
            Err(CacheError::InvalidCapacity)
        ));
    }

    #[test]
    fn put_get_roundtrip_without_ttl() {
        let c = cache(4);
        c.put(1, "a");
        assert_eq!(c.get(&1), Some("a"));
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses), (1, 0));
    }

    #[test]
    fn get_moves_entry_to_recency_front() {
        let c = cache(4);
        c.put(1, "a");
        c.put(2, "b");
        c.put(3, "c");
        assert_eq!(c.get(&1), Some("a"));
        assert_eq!(c.keys_snapshot(), vec![1, 3, 2]);
    }

    #[test]
    fn eviction_scenario_drops_lru_tail() {
        // Capacity 3: put 1,2,3; get 1; put 4 -> 2 evicted.
        let c = cache(3);
        c.put(1, "a");
        c.put(2, "b");
        c.put(3, "c");
        assert_eq!(c.get(&1), Some("a"));
        c.put(4, "d");

        assert_eq!(c.keys_snapshot(), vec![4, 1, 3]);
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn capacity_one_holds_most_recent_put() {
        let c = cache(1);
        c.put(1, "a");
        c.put(2, "b");
        assert_eq!(c.keys_snapshot(), vec![2]);
        assert_eq!(c.get(&1), None);
        assert_eq!(c.get(&2), Some("b"));
    }

    #[test]
    fn ttl_expiry_is_lazy_and_counts_once() {
        let c: Cache<&str, &str> = Cache::new("ttl", 10, Some(Duration::from_millis(30))).unwrap();
        c.put("k", "v");
        assert_eq!(c.get(&"k"), Some("v"));
        assert_eq!(c.stats().hits, 1);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(c.get(&"k"), None);

        let stats = c.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn explicit_ttl_overrides_default() {
        let c: Cache<&str, &str> = Cache::new("ttl", 10, Some(Duration::from_millis(5))).unwrap();
        c.put_with_ttl("k", "v", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.get(&"k"), Some("v"));
    }

    #[test]
    fn put_at_capacity_prefers_dropping_expired_entries() {
        let c: Cache<u32, &str> = Cache::new("mixed", 2, None).unwrap();
        c.put_with_ttl(1, "short", Duration::from_millis(10));
        c.put(2, "live");
        std::thread::sleep(Duration::from_millis(30));

        c.put(3, "new");
        let mut keys = c.keys_snapshot();
        keys.sort_unstable();
        assert_eq!(keys, vec![2, 3]);

        let stats = c.stats();
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn resize_down_evicts_exactly_the_tail() {
        let c = cache(4);
        c.put(1, "a");
        c.put(2, "b");
        c.put(3, "c");
        c.put(4, "d");

        c.resize(2).unwrap();
        assert_eq!(c.keys_snapshot(), vec![4, 3]);
        assert_eq!(c.stats().evictions, 2);
        assert!(matches!(c.resize(0), Err(CacheError::InvalidCapacity)));
    }

    #[test]
    fn cleanup_expired_reports_removed_count() {
        let c: Cache<u32, &str> = Cache::new("sweep", 10, Some(Duration::from_millis(10))).unwrap();
        c.put(1, "a");
        c.put(2, "b");
        c.put_with_ttl(3, "c", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(c.cleanup_expired(), 2);
        assert_eq!(c.size(), 1);
        assert_eq!(c.stats().expirations, 2);
    }

    #[test]
    fn contains_does_not_refresh_recency_or_count() {
        let c = cache(2);
        c.put(1, "a");
        c.put(2, "b");
        assert!(c.contains(&1));
        assert_eq!(c.keys_snapshot(), vec![2, 1]);
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[test]
    fn size_matches_snapshot_after_mixed_operations() {
        let c = cache(3);
        for i in 0..10 {
            c.put(i, "x");
            if i % 2 == 0 {
                c.get(&i);
            }
            if i % 3 == 0 {
                c.remove(&i);
            }
            assert!(c.size() <= 3);
            assert_eq!(c.size(), c.keys_snapshot().len());
        }
    }

    #[test]
    fn compute_if_absent_computes_once() {
        let c = cache(4);
        let mut calls = 0;
        let v = c.compute_if_absent(7, None, || {
            calls += 1;
            "computed"
        });
        assert_eq!(v, "computed");
        assert_eq!(c.compute_if_absent(7, None, || unreachable!()), "computed");
        assert_eq!(calls, 1);
    }
}
