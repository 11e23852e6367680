//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::turnstile::v1::captcha_service_server::CaptchaServiceServer;
use super::proto::turnstile::v1::rate_limit_service_server::RateLimitServiceServer;
use super::service::{CaptchaServiceImpl, RateLimitServiceImpl};
use crate::captcha::CaptchaService;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::RateLimiter;
use crate::store::SharedCounterStore;

/// gRPC server for the rate limit and captcha services.
pub struct GrpcServer<S: SharedCounterStore + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    limiter: Arc<RateLimiter<S>>,
    /// The captcha service instance
    captcha: Arc<CaptchaService<S>>,
}

impl<S: SharedCounterStore + 'static> GrpcServer<S> {
    /// Create a new gRPC server.
    pub fn new(
        addr: SocketAddr,
        limiter: Arc<RateLimiter<S>>,
        captcha: Arc<CaptchaService<S>>,
    ) -> Self {
        Self {
            addr,
            limiter,
            captcha,
        }
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        let rate_limit = RateLimitServiceImpl::new(self.limiter);
        let captcha = CaptchaServiceImpl::new(self.captcha);

        info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(RateLimitServiceServer::new(rate_limit))
            .add_service(CaptchaServiceServer::new(captcha))
            .serve(self.addr)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                TurnstileError::Grpc(e)
            })
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let rate_limit = RateLimitServiceImpl::new(self.limiter);
        let captcha = CaptchaServiceImpl::new(self.captcha);

        info!(addr = %self.addr, "Starting gRPC server with graceful shutdown");

        Server::builder()
            .add_service(RateLimitServiceServer::new(rate_limit))
            .add_service(CaptchaServiceServer::new(captcha))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                TurnstileError::Grpc(e)
            })
    }
}
