//! # Cache substrate: named, typed, thread-safe TTL+LRU caches.
//!
//! Two layers:
//!
//! - [`Cache<K, V>`] one typed cache instance with LRU eviction, per-entry
//!   TTL expiration, and statistics.
//! - [`CacheRegistry`] a named collection of heterogeneously-typed caches
//!   with type-safe retrieval and aggregate maintenance.
//!
//! ## Rules
//! - Every instance is protected by its own lock; the registry has its own.
//! - Expiry is lazy on access and eager on [`Cache::cleanup_expired`].
//! - Capacity eviction and TTL expiry are counted separately
//!   (`evictions` vs `expirations`).
//! - Typed retrieval of a name stored with different types fails with
//!   [`CacheError::TypeMismatch`](crate::error::CacheError::TypeMismatch).

mod lru;
mod registry;

pub use lru::{Cache, CacheStats};
pub use registry::{CacheMaintenance, CacheRegistry};
