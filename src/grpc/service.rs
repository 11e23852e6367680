//! Rate limit and captcha service implementations.
//!
//! These handlers are the explicit pipeline stage in front of protected
//! operations: validate the request, consult the limiter or captcha
//! service, and short-circuit with the appropriate signal on denial.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::turnstile::v1::{
    captcha_service_server::CaptchaService as CaptchaGrpc, check_response::Code,
    rate_limit_service_server::RateLimitService as RateLimitGrpc,
    verify_captcha_response::Verdict, CheckRequest, CheckResponse, IssueCaptchaRequest,
    IssueCaptchaResponse, VerifyCaptchaRequest, VerifyCaptchaResponse,
};

use crate::captcha::CaptchaService;
use crate::error::TurnstileError;
use crate::ratelimit::RateLimiter;
use crate::store::SharedCounterStore;

/// Map an internal error onto the gRPC status surface.
///
/// Store unavailability maps to UNAVAILABLE, distinctly from both denial
/// and application errors, so callers can choose their fail-open or
/// fail-closed policy.
fn into_status(err: TurnstileError) -> Status {
    match err {
        TurnstileError::InvalidArgument(msg) => Status::invalid_argument(msg),
        TurnstileError::StoreUnavailable(msg) => Status::unavailable(msg),
        other => Status::internal(other.to_string()),
    }
}

/// Implementation of the RateLimitService gRPC interface.
pub struct RateLimitServiceImpl<S: SharedCounterStore> {
    /// The rate limiter instance
    limiter: Arc<RateLimiter<S>>,
}

impl<S: SharedCounterStore> RateLimitServiceImpl<S> {
    /// Create a new RateLimitServiceImpl with the given rate limiter.
    pub fn new(limiter: Arc<RateLimiter<S>>) -> Self {
        Self { limiter }
    }
}

#[tonic::async_trait]
impl<S: SharedCounterStore + 'static> RateLimitGrpc for RateLimitServiceImpl<S> {
    /// Determine whether the caller may proceed.
    ///
    /// A denied check is a successful response with an OVER_LIMIT code, so
    /// upstream clients can distinguish throttling from outages.
    #[instrument(
        skip(self, request),
        fields(
            discriminator = %request.get_ref().discriminator,
            refresh_expiry = request.get_ref().refresh_expiry
        )
    )]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();

        if req.discriminator.is_empty() {
            warn!("Received rate limit check with empty discriminator");
            return Err(Status::invalid_argument("discriminator is required"));
        }

        let outcome = if req.refresh_expiry {
            self.limiter.try_consume_and_expire(&req.discriminator).await
        } else {
            self.limiter.try_consume(&req.discriminator).await
        };

        let code = match outcome {
            Ok(()) => Code::Ok,
            Err(TurnstileError::RateLimitExceeded { .. }) => {
                debug!(discriminator = %req.discriminator, "Rate limit exceeded");
                Code::OverLimit
            }
            Err(err) => return Err(into_status(err)),
        };

        info!(
            discriminator = %req.discriminator,
            code = ?code,
            "Rate limit decision made"
        );

        Ok(Response::new(CheckResponse { code: code.into() }))
    }
}

/// Implementation of the CaptchaService gRPC interface.
pub struct CaptchaServiceImpl<S: SharedCounterStore> {
    /// The captcha service instance
    captcha: Arc<CaptchaService<S>>,
}

impl<S: SharedCounterStore> CaptchaServiceImpl<S> {
    /// Create a new CaptchaServiceImpl with the given captcha service.
    pub fn new(captcha: Arc<CaptchaService<S>>) -> Self {
        Self { captcha }
    }
}

#[tonic::async_trait]
impl<S: SharedCounterStore + 'static> CaptchaGrpc for CaptchaServiceImpl<S> {
    /// Create a new one-time challenge.
    #[instrument(skip(self, _request))]
    async fn issue(
        &self,
        _request: Request<IssueCaptchaRequest>,
    ) -> Result<Response<IssueCaptchaResponse>, Status> {
        let challenge = self.captcha.issue().await.map_err(into_status)?;

        Ok(Response::new(IssueCaptchaResponse {
            enabled: challenge.enabled,
            id: challenge.id,
            challenge: challenge.text,
        }))
    }

    /// Verify and consume a previously issued challenge.
    #[instrument(skip(self, request), fields(id = %request.get_ref().id))]
    async fn verify(
        &self,
        request: Request<VerifyCaptchaRequest>,
    ) -> Result<Response<VerifyCaptchaResponse>, Status> {
        let req = request.into_inner();

        let verdict = match self.captcha.verify(&req.answer, &req.id).await {
            Ok(()) => Verdict::Ok,
            Err(TurnstileError::CaptchaExpired) => Verdict::Expired,
            Err(TurnstileError::CaptchaIncorrect) => Verdict::Incorrect,
            Err(err) => return Err(into_status(err)),
        };

        Ok(Response::new(VerifyCaptchaResponse {
            verdict: verdict.into(),
        }))
    }
}
