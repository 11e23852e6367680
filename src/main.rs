use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use turnstile::captcha::CaptchaService;
use turnstile::config::TurnstileConfig;
use turnstile::grpc::GrpcServer;
use turnstile::ratelimit::RateLimiter;
use turnstile::store::RedisCounterStore;

#[derive(Parser, Debug)]
#[command(name = "turnstile", about = "Distributed rate limiting service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Turnstile Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // Load configuration; defaults apply when no file is given
    let config = match args.config.as_deref() {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => {
            let config = TurnstileConfig::default();
            config.validate()?;
            config
        }
    };
    info!(grpc_addr = %config.server.grpc_addr, "Configuration loaded");

    // Connect to the shared store
    let store = Arc::new(
        RedisCounterStore::connect(
            &config.store.url,
            Duration::from_millis(config.store.request_timeout_ms),
        )
        .await?,
    );
    info!(url = %config.store.url, "Shared store connected");

    // Initialize the rate limiter and captcha service
    let limiter = Arc::new(RateLimiter::new(
        store.clone(),
        config.rate_limiting.clone(),
    ));
    let captcha = Arc::new(CaptchaService::new(store, config.captcha.clone()));
    info!("Rate limiter initialized");

    // Create and start the gRPC server
    let grpc_server = GrpcServer::new(config.server.grpc_addr, limiter, captcha);

    info!("Starting gRPC server on {}", config.server.grpc_addr);

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile Rate Limiting Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
