//! gRPC server module for the rate limit and captcha services.

mod server;
mod service;

pub use server::GrpcServer;
pub use service::{CaptchaServiceImpl, RateLimitServiceImpl};

// Include the generated protobuf code
pub mod proto {
    pub mod turnstile {
        pub mod v1 {
            tonic::include_proto!("turnstile.v1");
        }
    }
}

// Re-export commonly used types
pub use proto::turnstile::v1::{
    captcha_service_server::CaptchaServiceServer,
    rate_limit_service_server::RateLimitServiceServer, CheckRequest, CheckResponse,
    IssueCaptchaRequest, IssueCaptchaResponse, VerifyCaptchaRequest, VerifyCaptchaResponse,
};
