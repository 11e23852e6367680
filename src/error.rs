//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Caller-supplied input was unusable (e.g. an empty discriminator).
    /// Never retried; the store is not contacted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The bucket had insufficient permits. Expected and frequent;
    /// recoverable by the caller after waiting.
    #[error("Rate limit exceeded for key: {key}")]
    RateLimitExceeded {
        /// The composed limiter key that was denied
        key: String,
    },

    /// The shared store could not be reached or timed out. Propagated
    /// distinctly, never mapped to an implicit allow or deny.
    #[error("Shared store unavailable: {0}")]
    StoreUnavailable(String),

    /// No captcha answer found for the given id: unknown, already
    /// consumed, or past its TTL.
    #[error("Captcha has expired or was already consumed")]
    CaptchaExpired,

    /// The supplied captcha answer did not match the stored one.
    #[error("Captcha answer is incorrect")]
    CaptchaIncorrect,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for TurnstileError {
    fn from(err: redis::RedisError) -> Self {
        TurnstileError::StoreUnavailable(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
