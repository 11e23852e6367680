//! One-time captcha challenge issuance and verification.
//!
//! Challenges live in the shared store under their own namespace, so any
//! instance can verify a challenge issued by any other. An answer is
//! consumed exactly once, before comparison, regardless of the outcome,
//! which makes replaying a captured answer impossible.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::{CaptchaKind, CaptchaSettings};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::CAPTCHA_PREFIX;
use crate::store::SharedCounterStore;

/// A freshly issued challenge.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Whether captcha checking is enabled at all. When false, `id` and
    /// `text` are empty and nothing was stored.
    pub enabled: bool,
    /// Random, unguessable challenge identifier
    pub id: String,
    /// The text presented to the caller
    pub text: String,
}

/// Issues and verifies one-time challenges against the shared store.
pub struct CaptchaService<S: SharedCounterStore> {
    store: Arc<S>,
    settings: CaptchaSettings,
}

impl<S: SharedCounterStore> CaptchaService<S> {
    /// Create a new captcha service over the given store.
    pub fn new(store: Arc<S>, settings: CaptchaSettings) -> Self {
        Self { store, settings }
    }

    /// Create a new one-time challenge.
    pub async fn issue(&self) -> Result<Challenge> {
        if !self.settings.enabled {
            return Ok(Challenge {
                enabled: false,
                id: String::new(),
                text: String::new(),
            });
        }

        let id = Uuid::new_v4().simple().to_string();
        let (text, answer) = match self.settings.kind {
            CaptchaKind::Chars => {
                let code = random_chars(self.settings.char_length);
                (code.clone(), code)
            }
            CaptchaKind::Math => random_math(self.settings.digit_length),
        };

        let key = format!("{}{}", CAPTCHA_PREFIX, id);
        self.store
            .put_string(&key, &answer, Duration::from_secs(self.settings.ttl_secs))
            .await?;

        debug!(id = %id, "Issued captcha challenge");

        Ok(Challenge {
            enabled: true,
            id,
            text,
        })
    }

    /// Verify and consume the challenge `id` against `answer`.
    ///
    /// The stored answer is deleted before comparison, so a second attempt
    /// with the same id fails as expired whatever the first attempt did.
    pub async fn verify(&self, answer: &str, id: &str) -> Result<()> {
        if answer.is_empty() {
            return Err(TurnstileError::InvalidArgument(
                "captcha answer must not be empty".to_string(),
            ));
        }
        if id.is_empty() {
            return Err(TurnstileError::InvalidArgument(
                "captcha id must not be empty".to_string(),
            ));
        }

        let key = format!("{}{}", CAPTCHA_PREFIX, id);
        let stored = self.store.take_string(&key).await?;

        let Some(expected) = stored else {
            debug!(id = %id, "Captcha expired or already consumed");
            return Err(TurnstileError::CaptchaExpired);
        };

        if expected != answer {
            debug!(id = %id, "Captcha answer mismatch");
            return Err(TurnstileError::CaptchaIncorrect);
        }

        Ok(())
    }
}

fn random_chars(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate an arithmetic challenge and its computed answer.
fn random_math(digit_length: u32) -> (String, String) {
    let mut rng = rand::thread_rng();
    let max = 10i64.pow(digit_length);
    let a = rng.gen_range(0..max);
    let b = rng.gen_range(0..max);

    match rng.gen_range(0..3) {
        0 => (format!("{}+{}=", a, b), (a + b).to_string()),
        // Keep subtraction results non-negative.
        1 => (
            format!("{}-{}=", a.max(b), a.min(b)),
            (a.max(b) - a.min(b)).to_string(),
        ),
        _ => (format!("{}*{}=", a, b), (a * b).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;

    fn chars_settings() -> CaptchaSettings {
        CaptchaSettings {
            enabled: true,
            kind: CaptchaKind::Chars,
            char_length: 4,
            digit_length: 1,
            ttl_secs: 300,
        }
    }

    fn service(
        settings: CaptchaSettings,
    ) -> (Arc<MemoryCounterStore>, CaptchaService<MemoryCounterStore>) {
        let store = Arc::new(MemoryCounterStore::new());
        let service = CaptchaService::new(store.clone(), settings);
        (store, service)
    }

    /// Evaluate a challenge like "3+4=" the way a human caller would.
    fn solve(text: &str) -> String {
        let expr = text.trim_end_matches('=');
        for op in ['+', '-', '*'] {
            if let Some((a, b)) = expr.split_once(op) {
                let a: i64 = a.parse().unwrap();
                let b: i64 = b.parse().unwrap();
                let result = match op {
                    '+' => a + b,
                    '-' => a - b,
                    _ => a * b,
                };
                return result.to_string();
            }
        }
        panic!("no operator in challenge: {text}");
    }

    #[tokio::test]
    async fn test_chars_roundtrip() {
        let (_, service) = service(chars_settings());

        let challenge = service.issue().await.unwrap();
        assert!(challenge.enabled);
        assert_eq!(challenge.text.len(), 4);

        service
            .verify(&challenge.text, &challenge.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_math_roundtrip() {
        let settings = CaptchaSettings {
            kind: CaptchaKind::Math,
            digit_length: 2,
            ..chars_settings()
        };
        let (_, service) = service(settings);

        let challenge = service.issue().await.unwrap();
        let answer = solve(&challenge.text);
        service.verify(&answer, &challenge.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_challenge_is_single_use() {
        let (_, service) = service(chars_settings());

        let challenge = service.issue().await.unwrap();
        service
            .verify(&challenge.text, &challenge.id)
            .await
            .unwrap();

        assert!(matches!(
            service.verify(&challenge.text, &challenge.id).await,
            Err(TurnstileError::CaptchaExpired)
        ));
    }

    #[tokio::test]
    async fn test_mismatch_consumes_the_challenge() {
        let (_, service) = service(chars_settings());

        let challenge = service.issue().await.unwrap();
        assert!(matches!(
            service.verify("wrong!", &challenge.id).await,
            Err(TurnstileError::CaptchaIncorrect)
        ));

        // The correct answer no longer works: consumed on the failed try.
        assert!(matches!(
            service.verify(&challenge.text, &challenge.id).await,
            Err(TurnstileError::CaptchaExpired)
        ));
    }

    #[tokio::test]
    async fn test_expired_challenge_rejected() {
        let (store, service) = service(chars_settings());

        let challenge = service.issue().await.unwrap();
        store.advance(Duration::from_secs(301));

        assert!(matches!(
            service.verify(&challenge.text, &challenge.id).await,
            Err(TurnstileError::CaptchaExpired)
        ));
    }

    #[tokio::test]
    async fn test_blank_inputs_rejected() {
        let (_, service) = service(chars_settings());

        assert!(matches!(
            service.verify("", "some-id").await,
            Err(TurnstileError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.verify("1234", "").await,
            Err(TurnstileError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_captcha_is_inert() {
        let settings = CaptchaSettings {
            enabled: false,
            ..chars_settings()
        };
        let (store, service) = service(settings);

        let challenge = service.issue().await.unwrap();
        assert!(!challenge.enabled);
        assert!(challenge.id.is_empty());
        assert_eq!(store.string_count(), 0);
    }
}
