//! In-process implementation of the shared counter store.
//!
//! Provides the same semantics as the Redis store for a single process:
//! configure-if-absent, atomic deduction, and per-key TTLs. It does not
//! provide the cross-instance guarantee and is intended for tests and
//! single-instance deployments.
//!
//! Time is read through an adjustable offset so tests can advance the clock
//! instead of sleeping.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::SharedCounterStore;
use crate::error::{Result, TurnstileError};

struct LimiterEntry {
    rate_per_interval: u64,
    interval: Duration,
    available: u64,
    last_refill: Instant,
    expires_at: Option<Instant>,
}

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// Shared counter store held in process memory.
#[derive(Default)]
pub struct MemoryCounterStore {
    limiters: DashMap<String, LimiterEntry>,
    strings: DashMap<String, StringEntry>,
    clock_offset: Mutex<Duration>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the store's clock without sleeping.
    ///
    /// This is primarily useful for testing refill and expiry behavior.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.clock_offset.lock();
        *offset += by;
    }

    /// Whether any physical key with this name currently exists.
    ///
    /// Expired entries are purged on observation, the same way a TTL'd key
    /// in the external store is simply absent after its deadline.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.now();
        self.purge_if_expired(key, now);
        self.limiters.contains_key(key) || self.strings.contains_key(key)
    }

    /// The number of live limiter entries.
    pub fn limiter_count(&self) -> usize {
        let now = self.now();
        self.limiters
            .retain(|_, entry| !expired(entry.expires_at, now));
        self.limiters.len()
    }

    /// The number of live string entries.
    pub fn string_count(&self) -> usize {
        let now = self.now();
        self.strings
            .retain(|_, entry| !expired(entry.expires_at, now));
        self.strings.len()
    }

    fn now(&self) -> Instant {
        Instant::now() + *self.clock_offset.lock()
    }

    fn purge_if_expired(&self, key: &str, now: Instant) {
        self.limiters
            .remove_if(key, |_, entry| expired(entry.expires_at, now));
        self.strings
            .remove_if(key, |_, entry| expired(entry.expires_at, now));
    }
}

fn expired(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|at| at <= now)
}

#[async_trait::async_trait]
impl SharedCounterStore for MemoryCounterStore {
    async fn ensure_limiter(
        &self,
        key: &str,
        rate_per_interval: u64,
        interval: Duration,
    ) -> Result<()> {
        let now = self.now();
        self.purge_if_expired(key, now);

        // First writer wins: an existing entry is left untouched even when
        // the parameters differ.
        self.limiters
            .entry(key.to_string())
            .or_insert_with(|| LimiterEntry {
                rate_per_interval,
                interval,
                available: rate_per_interval,
                last_refill: now,
                expires_at: None,
            });
        Ok(())
    }

    async fn try_acquire(&self, key: &str, permits: u64) -> Result<bool> {
        let now = self.now();
        self.purge_if_expired(key, now);

        let mut entry = self.limiters.get_mut(key).ok_or_else(|| {
            TurnstileError::StoreUnavailable("limiter is not configured".to_string())
        })?;

        if now.duration_since(entry.last_refill) >= entry.interval {
            entry.available = entry.rate_per_interval;
            entry.last_refill = now;
        }

        if entry.available >= permits {
            entry.available -= permits;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let deadline = self.now() + ttl;
        if let Some(mut entry) = self.limiters.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        if let Some(mut entry) = self.strings.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        Ok(())
    }

    async fn put_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let deadline = self.now() + ttl;
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(deadline),
            },
        );
        Ok(())
    }

    async fn take_string(&self, key: &str) -> Result<Option<String>> {
        let now = self.now();
        match self.strings.remove(key) {
            Some((_, entry)) if !expired(entry.expires_at, now) => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }
}
