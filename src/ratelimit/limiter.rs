//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::keys::{limiter_key, validate_discriminator};
use crate::config::RateLimitSettings;
use crate::error::{Result, TurnstileError};
use crate::store::SharedCounterStore;

/// A rate limiter gating operations behind a shared, cross-instance permit
/// budget.
///
/// The limiter holds no mutable state of its own: every decision is an
/// atomic operation against the shared store, so any number of instances
/// can enforce one budget per discriminator. Settings are immutable for the
/// life of the process.
pub struct RateLimiter<S: SharedCounterStore> {
    store: Arc<S>,
    settings: RateLimitSettings,
}

impl<S: SharedCounterStore> RateLimiter<S> {
    /// Create a new rate limiter over the given store.
    pub fn new(store: Arc<S>, settings: RateLimitSettings) -> Self {
        Self { store, settings }
    }

    /// Attempt to consume the configured permit cost for `discriminator`.
    ///
    /// Returns `Ok(())` when the permits were deducted. A denial is
    /// terminal for this call and surfaces as
    /// [`TurnstileError::RateLimitExceeded`]; no retry happens internally.
    pub async fn try_consume(&self, discriminator: &str) -> Result<()> {
        validate_discriminator(discriminator)?;
        let key = limiter_key(discriminator);
        self.acquire(&key).await
    }

    /// Same as [`try_consume`](Self::try_consume), plus a refresh of the
    /// idle-expiry TTL on every physical key backing this limiter.
    ///
    /// The TTL is refreshed after allowed and denied attempts alike, so an
    /// active limiter is continuously pushed forward and only a genuinely
    /// idle discriminator ever has its keys reclaimed.
    pub async fn try_consume_and_expire(&self, discriminator: &str) -> Result<()> {
        validate_discriminator(discriminator)?;
        let key = limiter_key(discriminator);

        let outcome = self.acquire(&key).await;

        // Refresh on allowed and denied attempts alike; skip it when the
        // store itself already failed.
        if matches!(
            outcome,
            Ok(()) | Err(TurnstileError::RateLimitExceeded { .. })
        ) {
            self.refresh_idle_expiry(&key).await?;
        }

        outcome
    }

    async fn acquire(&self, key: &str) -> Result<()> {
        trace!(key = %key, "Checking rate limit");

        let interval = Duration::from_secs(self.settings.interval_secs);
        self.store
            .ensure_limiter(key, self.settings.rate_per_interval, interval)
            .await?;

        let allowed = self
            .store
            .try_acquire(key, self.settings.permit_cost)
            .await?;

        if allowed {
            Ok(())
        } else {
            debug!(key = %key, "Rate limit exceeded");
            Err(TurnstileError::RateLimitExceeded {
                key: key.to_string(),
            })
        }
    }

    async fn refresh_idle_expiry(&self, key: &str) -> Result<()> {
        let ttl = Duration::from_secs(
            self.settings.interval_secs * self.settings.idle_expiry_multiplier,
        );

        for physical_key in self.store.backing_keys(key) {
            self.store.expire(&physical_key, ttl).await?;
        }

        trace!(key = %key, ttl_secs = ttl.as_secs(), "Refreshed idle expiry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;

    fn settings(rate: u64, interval_secs: u64, cost: u64) -> RateLimitSettings {
        RateLimitSettings {
            rate_per_interval: rate,
            interval_secs,
            permit_cost: cost,
            idle_expiry_multiplier: 3,
        }
    }

    fn limiter(
        rate: u64,
        interval_secs: u64,
        cost: u64,
    ) -> (Arc<MemoryCounterStore>, RateLimiter<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone(), settings(rate, interval_secs, cost));
        (store, limiter)
    }

    /// A store that fails every call, standing in for an unreachable
    /// backend.
    struct FailingStore;

    #[async_trait::async_trait]
    impl SharedCounterStore for FailingStore {
        async fn ensure_limiter(&self, _: &str, _: u64, _: Duration) -> Result<()> {
            Err(TurnstileError::StoreUnavailable(
                "connection refused".to_string(),
            ))
        }

        async fn try_acquire(&self, _: &str, _: u64) -> Result<bool> {
            Err(TurnstileError::StoreUnavailable(
                "connection refused".to_string(),
            ))
        }

        async fn expire(&self, _: &str, _: Duration) -> Result<()> {
            Err(TurnstileError::StoreUnavailable(
                "connection refused".to_string(),
            ))
        }

        async fn put_string(&self, _: &str, _: &str, _: Duration) -> Result<()> {
            Err(TurnstileError::StoreUnavailable(
                "connection refused".to_string(),
            ))
        }

        async fn take_string(&self, _: &str) -> Result<Option<String>> {
            Err(TurnstileError::StoreUnavailable(
                "connection refused".to_string(),
            ))
        }
    }

    /// A store that spreads one logical limiter across three physical
    /// keys, like the Redis layout, and records every TTL write.
    struct MultiKeyStore {
        inner: MemoryCounterStore,
        expired: parking_lot::Mutex<Vec<(String, Duration)>>,
    }

    impl MultiKeyStore {
        fn new() -> Self {
            Self {
                inner: MemoryCounterStore::new(),
                expired: parking_lot::Mutex::new(Vec::new()),
            }
        }

        fn expired_keys(&self) -> Vec<(String, Duration)> {
            self.expired.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl SharedCounterStore for MultiKeyStore {
        async fn ensure_limiter(&self, key: &str, rate: u64, interval: Duration) -> Result<()> {
            self.inner.ensure_limiter(key, rate, interval).await
        }

        async fn try_acquire(&self, key: &str, permits: u64) -> Result<bool> {
            self.inner.try_acquire(key, permits).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
            self.expired.lock().push((key.to_string(), ttl));
            self.inner.expire(key, ttl).await
        }

        fn backing_keys(&self, key: &str) -> Vec<String> {
            vec![
                key.to_string(),
                format!("{{{}}}:permits", key),
                format!("{{{}}}:value", key),
            ]
        }

        async fn put_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
            self.inner.put_string(key, value, ttl).await
        }

        async fn take_string(&self, key: &str) -> Result<Option<String>> {
            self.inner.take_string(key).await
        }
    }

    #[tokio::test]
    async fn test_two_allowed_then_third_denied() {
        let (_, limiter) = limiter(2, 1, 1);

        assert!(limiter.try_consume("u1").await.is_ok());
        assert!(limiter.try_consume("u1").await.is_ok());
        assert!(matches!(
            limiter.try_consume("u1").await,
            Err(TurnstileError::RateLimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_bucket_refills_after_interval() {
        let (store, limiter) = limiter(2, 1, 1);

        limiter.try_consume("u1").await.unwrap();
        limiter.try_consume("u1").await.unwrap();
        assert!(limiter.try_consume("u1").await.is_err());

        store.advance(Duration::from_millis(1100));
        assert!(limiter.try_consume("u1").await.is_ok());
    }

    #[tokio::test]
    async fn test_permit_cost_divides_budget() {
        let (_, limiter) = limiter(4, 1, 2);

        assert!(limiter.try_consume("u1").await.is_ok());
        assert!(limiter.try_consume("u1").await.is_ok());
        assert!(limiter.try_consume("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_discriminators_have_independent_budgets() {
        let (_, limiter) = limiter(1, 1, 1);

        assert!(limiter.try_consume("u1").await.is_ok());
        assert!(limiter.try_consume("u2").await.is_ok());
        assert!(limiter.try_consume("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_discriminator_fails_before_store_contact() {
        // A failing store proves the store is never consulted: any store
        // call would surface as StoreUnavailable instead.
        let limiter = RateLimiter::new(Arc::new(FailingStore), settings(2, 1, 1));

        assert!(matches!(
            limiter.try_consume("").await,
            Err(TurnstileError::InvalidArgument(_))
        ));
        assert!(matches!(
            limiter.try_consume_and_expire("").await,
            Err(TurnstileError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_distinct_from_denial() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), settings(2, 1, 1));

        assert!(matches!(
            limiter.try_consume("u1").await,
            Err(TurnstileError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_idle_limiter_expires() {
        let (store, limiter) = limiter(2, 1, 1);

        limiter.try_consume_and_expire("u1").await.unwrap();
        assert!(store.contains_key("turnstile:rate_limit:u1"));

        // idle_expiry_multiplier = 3, interval = 1s
        store.advance(Duration::from_millis(3100));
        assert!(!store.contains_key("turnstile:rate_limit:u1"));
    }

    #[tokio::test]
    async fn test_active_limiter_is_not_expired() {
        let (store, limiter) = limiter(2, 1, 1);

        limiter.try_consume_and_expire("u1").await.unwrap();
        store.advance(Duration::from_secs(2));

        // Another call pushes the TTL forward.
        limiter.try_consume_and_expire("u1").await.unwrap();
        store.advance(Duration::from_secs(2));
        assert!(store.contains_key("turnstile:rate_limit:u1"));

        store.advance(Duration::from_millis(1100));
        assert!(!store.contains_key("turnstile:rate_limit:u1"));
    }

    #[tokio::test]
    async fn test_denied_call_still_refreshes_expiry() {
        let (store, limiter) = limiter(1, 10, 1);

        // TTL deadline lands at t=30s.
        limiter.try_consume_and_expire("u1").await.unwrap();

        // t=25s: drain the refilled bucket without touching the TTL, then
        // take a denial that must refresh it to t=55s.
        store.advance(Duration::from_secs(25));
        limiter.try_consume("u1").await.unwrap();
        assert!(matches!(
            limiter.try_consume_and_expire("u1").await,
            Err(TurnstileError::RateLimitExceeded { .. })
        ));

        // t=53s: past the original deadline, within the refreshed one.
        store.advance(Duration::from_secs(28));
        assert!(store.contains_key("turnstile:rate_limit:u1"));
    }

    #[tokio::test]
    async fn test_expiry_refresh_covers_every_backing_key() {
        let store = Arc::new(MultiKeyStore::new());
        let limiter = RateLimiter::new(store.clone(), settings(1, 1, 1));

        limiter.try_consume_and_expire("u1").await.unwrap();

        // idle_expiry_multiplier = 3, interval = 1s
        let ttl = Duration::from_secs(3);
        let refreshed = store.expired_keys();
        assert_eq!(
            refreshed,
            vec![
                ("turnstile:rate_limit:u1".to_string(), ttl),
                ("{turnstile:rate_limit:u1}:permits".to_string(), ttl),
                ("{turnstile:rate_limit:u1}:value".to_string(), ttl),
            ]
        );

        // A denied attempt refreshes the same three keys again.
        assert!(matches!(
            limiter.try_consume_and_expire("u1").await,
            Err(TurnstileError::RateLimitExceeded { .. })
        ));
        assert_eq!(store.expired_keys().len(), 6);
    }

    #[tokio::test]
    async fn test_plain_consume_leaves_no_ttl() {
        let (store, limiter) = limiter(2, 1, 1);

        limiter.try_consume("u1").await.unwrap();
        store.advance(Duration::from_secs(3600));
        assert!(store.contains_key("turnstile:rate_limit:u1"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_over_deduct() {
        let (_, limiter) = limiter(10, 60, 1);
        let limiter = Arc::new(limiter);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(
                async move { limiter.try_consume("u1").await },
            ));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }
}
