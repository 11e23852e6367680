//! Rate limiting logic over the shared counter store.

mod keys;
mod limiter;

pub use keys::{limiter_key, validate_discriminator, CAPTCHA_PREFIX, RATE_LIMIT_PREFIX};
pub use limiter::RateLimiter;
