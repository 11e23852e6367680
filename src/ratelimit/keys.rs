//! Key namespace discipline for the shared store.
//!
//! The store is multi-tenant across subsystems, so every subsystem writes
//! under its own fixed prefix and collisions are structurally impossible.

use crate::error::{Result, TurnstileError};

/// Namespace for rate limiter keys.
pub const RATE_LIMIT_PREFIX: &str = "turnstile:rate_limit:";

/// Namespace for captcha answer keys.
pub const CAPTCHA_PREFIX: &str = "turnstile:captcha:";

/// Reject discriminators that cannot identify an entity.
pub fn validate_discriminator(discriminator: &str) -> Result<()> {
    if discriminator.is_empty() {
        return Err(TurnstileError::InvalidArgument(
            "discriminator must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Compose the logical limiter key for a discriminator.
pub fn limiter_key(discriminator: &str) -> String {
    format!("{}{}", RATE_LIMIT_PREFIX, discriminator)
}
