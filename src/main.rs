//! upload-relay - streaming upload service

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upload_relay::{config::ConfigManager, metrics::Metrics, ShutdownCoordinator, UploadServer};

/// CLI arguments for upload-relay
#[derive(Parser, Debug)]
#[command(name = "upload-relay")]
#[command(about = "Upload service that streams request bodies to an upstream endpoint")]
#[command(version)]
#[command(long_about = "
Upload service that streams request bodies to an upstream endpoint.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  UPLOAD_RELAY_BIND_ADDR        - Bind address (e.g., 127.0.0.1:8888)
  UPLOAD_RELAY_MAX_BODY_SIZE    - Maximum request body size in bytes
  UPLOAD_RELAY_UPSTREAM_URL     - Upstream URL for streamed uploads
  UPLOAD_RELAY_REQUEST_TIMEOUT  - Relay deadline (e.g., 5m, 30s)
  UPLOAD_RELAY_AUTH_ENABLED     - Enable token checks (true/false)
  UPLOAD_RELAY_UPLOADS_DIR      - Directory for single-shot uploads
  UPLOAD_RELAY_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:8888)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Upstream URL for streamed uploads (overrides config file)
    #[arg(short, long, help = "Upstream URL for streamed uploads")]
    pub upstream: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Disable token checks (overrides config file)
    #[arg(long, help = "Disable authentication")]
    pub no_auth: bool,

    /// Relay deadline in seconds
    #[arg(long, help = "Relay deadline in seconds")]
    pub timeout: Option<u64>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.upstream.as_deref(),
        args.no_auth,
        args.timeout,
    );

    if let Some(level) = &args.log_level {
        config.monitoring.log_level = level.clone();
    }

    init_tracing(&args, &config.monitoring.log_level)?;

    info!("Starting upload-relay v{}", env!("CARGO_PKG_VERSION"));

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Upstream: {}", config.relay.upstream_url);
        info!("  Relay deadline: {:?}", config.relay.request_timeout);
        info!("  Max body size: {} bytes", config.server.max_body_size);
        info!(
            "  Authentication: {}",
            if config.auth.enabled { "enabled" } else { "disabled" }
        );
        info!("  Uploads directory: {}", config.storage.uploads_dir.display());
        return Ok(());
    }

    if !config.auth.enabled {
        warn!("Authentication disabled, uploads are accepted without a token");
    }

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);
    let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);

    let server = UploadServer::new(config, metrics)?;
    let listener = server.bind().await?;

    let mut server_handle = tokio::spawn(server.serve(listener, shutdown_coordinator.subscribe()));

    tokio::select! {
        result = &mut server_handle => {
            return match result {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("Server task failed: {}", e)),
            };
        }
        signal_result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = signal_result {
                error!("Error setting up signal handlers: {}", e);
                shutdown_coordinator.trigger();
            }
        }
    }

    info!(
        "Waiting up to {:?} for in-flight uploads to finish",
        shutdown_coordinator.timeout()
    );

    match tokio::time::timeout(shutdown_coordinator.timeout(), &mut server_handle).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => {
            if !e.is_cancelled() {
                error!("Server task failed: {}", e);
            }
        }
        Err(_) => {
            warn!("Shutdown timeout reached, aborting remaining uploads");
            server_handle.abort();
        }
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, log_level: &str) -> Result<()> {
    let log_level = if args.verbose { "debug" } else { log_level };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
