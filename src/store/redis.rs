//! Redis-backed implementation of the shared counter store.
//!
//! All mutating limiter operations run as Lua scripts so they are atomic
//! with respect to every other client, and all timestamps come from the
//! Redis server's own clock (`TIME`), so instances with skewed local clocks
//! still agree on refill boundaries.

use redis::aio::ConnectionManager;
use redis::Script;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::SharedCounterStore;
use crate::error::{Result, TurnstileError};

/// Configure-if-absent. HSETNX on the `rate` field is the conditional
/// write: whichever caller lands first owns the configuration, and every
/// later call (same parameters or not) leaves the bucket untouched.
const ENSURE_SCRIPT: &str = r#"
if redis.call("HSETNX", KEYS[1], "rate", ARGV[1]) == 1 then
    redis.call("HSET", KEYS[1], "interval_ms", ARGV[2])
end
return 1
"#;

/// Token bucket deduction. KEYS[1] holds the rate descriptor hash,
/// KEYS[2] the available permits, KEYS[3] the last refill timestamp.
/// The bucket refills to full once per interval. Counter writes use
/// KEEPTTL: a plain SET would strip the idle-expiry TTL from the counter
/// keys, leaving them permanent after the descriptor hash expires.
const ACQUIRE_SCRIPT: &str = r#"
local rate = tonumber(redis.call("HGET", KEYS[1], "rate"))
local interval_ms = tonumber(redis.call("HGET", KEYS[1], "interval_ms"))
if rate == nil or interval_ms == nil then
    return redis.error_reply("limiter is not configured")
end

local time = redis.call("TIME")
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

local available = tonumber(redis.call("GET", KEYS[2]))
local last_refill = tonumber(redis.call("GET", KEYS[3]))

if available == nil or last_refill == nil or now_ms - last_refill >= interval_ms then
    available = rate
    last_refill = now_ms
end

local permits = tonumber(ARGV[1])
local allowed = 0
if available >= permits then
    available = available - permits
    allowed = 1
end

redis.call("SET", KEYS[2], available, "KEEPTTL")
redis.call("SET", KEYS[3], last_refill, "KEEPTTL")

return allowed
"#;

/// Shared counter store backed by Redis.
pub struct RedisCounterStore {
    connection: ConnectionManager,
    request_timeout: Duration,
    ensure_script: Script,
    acquire_script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis at `url`.
    ///
    /// The connection manager transparently reconnects; individual requests
    /// are bounded by `request_timeout`.
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| TurnstileError::Config(format!("invalid store URL: {}", e)))?;
        let connection = client.get_connection_manager().await?;

        debug!(url = %url, "Connected to shared store");

        Ok(Self::with_connection(connection, request_timeout))
    }

    /// Create a store from an existing connection manager.
    pub fn with_connection(connection: ConnectionManager, request_timeout: Duration) -> Self {
        Self {
            connection,
            request_timeout,
            ensure_script: Script::new(ENSURE_SCRIPT),
            acquire_script: Script::new(ACQUIRE_SCRIPT),
        }
    }

    fn value_key(key: &str) -> String {
        format!("{{{}}}:value", key)
    }

    fn permits_key(key: &str) -> String {
        format!("{{{}}}:permits", key)
    }

    /// Run one store round-trip under the configured timeout.
    ///
    /// A timeout is reported as the store being unavailable, never as an
    /// implicit allow or deny.
    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(TurnstileError::from),
            Err(_) => Err(TurnstileError::StoreUnavailable(format!(
                "request timed out after {}ms",
                self.request_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl SharedCounterStore for RedisCounterStore {
    async fn ensure_limiter(
        &self,
        key: &str,
        rate_per_interval: u64,
        interval: Duration,
    ) -> Result<()> {
        let mut connection = self.connection.clone();
        let mut invocation = self.ensure_script.prepare_invoke();
        invocation
            .key(key)
            .arg(rate_per_interval)
            .arg(interval.as_millis() as u64);

        let _: i64 = self.call(invocation.invoke_async(&mut connection)).await?;
        Ok(())
    }

    async fn try_acquire(&self, key: &str, permits: u64) -> Result<bool> {
        let mut connection = self.connection.clone();
        let mut invocation = self.acquire_script.prepare_invoke();
        invocation
            .key(key)
            .key(Self::value_key(key))
            .key(Self::permits_key(key))
            .arg(permits);

        let allowed: i64 = self.call(invocation.invoke_async(&mut connection)).await?;
        Ok(allowed == 1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        let mut command = redis::cmd("PEXPIRE");
        command.arg(key).arg(ttl.as_millis() as u64);

        let _: i64 = self.call(command.query_async(&mut connection)).await?;
        Ok(())
    }

    fn backing_keys(&self, key: &str) -> Vec<String> {
        vec![
            key.to_string(),
            Self::permits_key(key),
            Self::value_key(key),
        ]
    }

    async fn put_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        let mut command = redis::cmd("SET");
        command
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64);

        let _: () = self.call(command.query_async(&mut connection)).await?;
        Ok(())
    }

    async fn take_string(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        let mut command = redis::cmd("GETDEL");
        command.arg(key);

        self.call(command.query_async(&mut connection)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_keys_mirror_physical_layout() {
        // One logical limiter is three physical keys: the descriptor hash
        // plus the two counter keys in the same hash slot.
        let key = "turnstile:rate_limit:u1";
        assert_eq!(
            RedisCounterStore::permits_key(key),
            "{turnstile:rate_limit:u1}:permits"
        );
        assert_eq!(
            RedisCounterStore::value_key(key),
            "{turnstile:rate_limit:u1}:value"
        );
    }

    #[test]
    fn test_acquire_script_keeps_counter_ttls() {
        // Every counter write in the acquire script must carry KEEPTTL.
        // Without it, a plain acquire after an acquire-and-expire resets
        // the TTL on {key}:value and {key}:permits to none, and those two
        // keys outlive the descriptor hash forever once it expires.
        let counter_writes: Vec<&str> = ACQUIRE_SCRIPT
            .lines()
            .filter(|line| line.contains(r#"call("SET""#))
            .collect();
        assert_eq!(counter_writes.len(), 2);
        for line in counter_writes {
            assert!(line.contains("KEEPTTL"), "counter write drops TTL: {line}");
        }
    }

    #[test]
    fn test_distinct_keys_never_collide() {
        assert_ne!(
            RedisCounterStore::value_key("a"),
            RedisCounterStore::value_key("b")
        );
        assert_ne!(
            RedisCounterStore::value_key("a"),
            RedisCounterStore::permits_key("a")
        );
    }
}
