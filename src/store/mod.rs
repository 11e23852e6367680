//! Shared counter store abstraction and implementations.
//!
//! The store is the single source of truth for all limiter state. No
//! instance caches bucket state locally; every decision is made by an
//! atomic operation against the store.

mod memory;
mod redis;

pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Trait for the shared, TTL-capable key-value store that backs the rate
/// limiter and the captcha subsystem.
///
/// All methods must be safe under arbitrary concurrent invocation from many
/// processes. The configure-if-absent and deduction primitives are
/// linearizable per key.
#[async_trait]
pub trait SharedCounterStore: Send + Sync {
    /// Configure a limiter at `key` if one does not already exist.
    ///
    /// A no-op when the key is already configured: an in-flight bucket is
    /// never re-initialized or reset by a later call, even with different
    /// parameters (first writer wins).
    async fn ensure_limiter(
        &self,
        key: &str,
        rate_per_interval: u64,
        interval: Duration,
    ) -> Result<()>;

    /// Atomically attempt to deduct `permits` from the bucket at `key`.
    ///
    /// The deduction is all-or-nothing: concurrent callers can never
    /// collectively over-debit beyond the configured rate. Returns `true`
    /// when the permits were deducted, `false` when insufficient permits
    /// remain.
    async fn try_acquire(&self, key: &str, permits: u64) -> Result<bool>;

    /// Set or refresh a TTL on one physical key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// The physical keys that implement the logical limiter at `key`.
    ///
    /// Implementations that spread one limiter across several keys override
    /// this so callers can expire all of them.
    fn backing_keys(&self, key: &str) -> Vec<String> {
        vec![key.to_string()]
    }

    /// Store a string value at `key` with a TTL.
    async fn put_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically read and delete the string value at `key`.
    ///
    /// Returns `None` when the key is absent or its TTL has elapsed. The
    /// delete happens regardless of what the caller does with the value,
    /// which is what makes captcha answers single-use.
    async fn take_string(&self, key: &str) -> Result<Option<String>>;
}
