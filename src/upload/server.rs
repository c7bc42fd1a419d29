//! Upload API Server

use super::{api::UploadApi, handlers::AppState};
use crate::auth::UploadAuth;
use crate::relay::RelayEngine;
use crate::storage::UploadStore;
use crate::{config::Config, metrics::Metrics, Result};
use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

/// HTTP server exposing the upload routes
pub struct UploadServer {
    bind_addr: SocketAddr,
    app_state: AppState,
    auth_config: crate::config::AuthConfig,
}

impl UploadServer {
    /// Build the server and its shared state from configuration
    pub fn new(config: Config, metrics: Arc<Metrics>) -> Result<Self> {
        let relay = RelayEngine::from_config(&config.relay)
            .context("Failed to create relay engine")?
            .with_metrics(metrics.clone());
        let store = UploadStore::from_config(&config.storage);

        let bind_addr = config.server.bind_addr;
        let auth_config = config.auth.clone();

        let app_state = AppState {
            config: Arc::new(config),
            relay: Arc::new(relay),
            store: Arc::new(store),
            metrics,
            start_time: SystemTime::now(),
        };

        Ok(Self {
            bind_addr,
            app_state,
            auth_config,
        })
    }

    /// Create the router serving this server's state
    pub fn router(&self) -> Router {
        let auth = UploadAuth::from_config(&self.auth_config).with_metrics(self.app_state.metrics.clone());
        UploadApi::create_router(self.app_state.clone(), auth)
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind upload server to {}", self.bind_addr))
    }

    /// Serve on `listener` until a shutdown signal is broadcast
    pub async fn serve(self, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let local_addr = listener.local_addr().context("Failed to read listener address")?;
        info!("Upload server listening on {}", local_addr);
        info!("Relaying /stream uploads to {}", self.app_state.relay.upstream_url());
        info!("Storing uploads in {}", self.app_state.store.uploads_dir().display());

        let app = self.router();

        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
            info!("Upload server received shutdown signal");
        };

        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            error!("Upload server error: {}", e);
            return Err(e.into());
        }

        info!("Upload server stopped");
        Ok(())
    }

    /// Bind and serve
    pub async fn start(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_rx).await
    }
}
