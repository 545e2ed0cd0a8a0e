//! # Quota-Bounded Cache
//!
//! Key/value cache with per-value and total byte quotas, TTL retention,
//! least-recently-accessed eviction, and transparent compression of large
//! values.

pub mod store;

pub use store::{Cache, CacheConfig, CacheStats};
