//! Configuration management for Turnstile.
//!
//! All values are read once at startup and are immutable for the life of the
//! process. Changing the rate limit parameters for an already-provisioned
//! limiter key is not supported by the store's configure-if-absent contract,
//! so a restart is required to apply new values.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitSettings,

    /// Captcha configuration
    #[serde(default)]
    pub captcha: CaptchaSettings,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    "127.0.0.1:8081".parse().unwrap()
}

/// Shared store (Redis) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Per-request timeout in milliseconds. A store call that exceeds this
    /// is reported as unavailable, not as an allow or deny.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_request_timeout_ms() -> u64 {
    1000
}

/// Rate limiting configuration.
///
/// All fields must be strictly positive; [`TurnstileConfig::validate`]
/// rejects misconfiguration at startup rather than at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Permits replenished per interval
    #[serde(default = "default_rate_per_interval")]
    pub rate_per_interval: u64,

    /// Length of the replenishment interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Permits consumed by each call
    #[serde(default = "default_permit_cost")]
    pub permit_cost: u64,

    /// Idle-expiry TTL as a multiple of the interval. Must exceed 1 so an
    /// actively used limiter is never expired between refills.
    #[serde(default = "default_idle_expiry_multiplier")]
    pub idle_expiry_multiplier: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rate_per_interval: default_rate_per_interval(),
            interval_secs: default_interval_secs(),
            permit_cost: default_permit_cost(),
            idle_expiry_multiplier: default_idle_expiry_multiplier(),
        }
    }
}

fn default_rate_per_interval() -> u64 {
    2
}

fn default_interval_secs() -> u64 {
    1
}

fn default_permit_cost() -> u64 {
    1
}

fn default_idle_expiry_multiplier() -> u64 {
    3
}

/// Captcha challenge kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaKind {
    /// Random alphanumeric string; the answer is the string itself.
    Chars,
    /// Arithmetic expression; the answer is the computed result.
    Math,
}

/// Captcha configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaSettings {
    /// Whether captcha issuance/verification is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Challenge kind
    #[serde(default = "default_captcha_kind")]
    pub kind: CaptchaKind,

    /// Length of the challenge for [`CaptchaKind::Chars`]
    #[serde(default = "default_char_length")]
    pub char_length: usize,

    /// Digits per operand for [`CaptchaKind::Math`], between 1 and 4
    #[serde(default = "default_digit_length")]
    pub digit_length: u32,

    /// Seconds before an unanswered challenge expires
    #[serde(default = "default_captcha_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: default_captcha_kind(),
            char_length: default_char_length(),
            digit_length: default_digit_length(),
            ttl_secs: default_captcha_ttl_secs(),
        }
    }
}

fn default_captcha_kind() -> CaptchaKind {
    CaptchaKind::Chars
}

fn default_char_length() -> usize {
    4
}

fn default_digit_length() -> u32 {
    1
}

fn default_captcha_ttl_secs() -> u64 {
    300
}

impl TurnstileConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Misconfiguration is rejected here, at startup, never at call time.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::TurnstileError::Config;

        if self.store.url.is_empty() {
            return Err(Config("store.url must not be empty".into()));
        }
        if self.store.request_timeout_ms == 0 {
            return Err(Config("store.request_timeout_ms must be positive".into()));
        }
        if self.rate_limiting.rate_per_interval == 0 {
            return Err(Config(
                "rate_limiting.rate_per_interval must be positive".into(),
            ));
        }
        if self.rate_limiting.interval_secs == 0 {
            return Err(Config("rate_limiting.interval_secs must be positive".into()));
        }
        if self.rate_limiting.permit_cost == 0 {
            return Err(Config("rate_limiting.permit_cost must be positive".into()));
        }
        if self.rate_limiting.idle_expiry_multiplier <= 1 {
            return Err(Config(
                "rate_limiting.idle_expiry_multiplier must be greater than 1".into(),
            ));
        }
        if self.captcha.enabled {
            if self.captcha.char_length == 0 {
                return Err(Config("captcha.char_length must be positive".into()));
            }
            if self.captcha.digit_length == 0 || self.captcha.digit_length > 4 {
                return Err(Config(
                    "captcha.digit_length must be between 1 and 4".into(),
                ));
            }
            if self.captcha.ttl_secs == 0 {
                return Err(Config("captcha.ttl_secs must be positive".into()));
            }
        }
        Ok(())
    }
}
