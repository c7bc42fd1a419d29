//! Upload API Handlers

use crate::config::Config;
use crate::error::UploadError;
use crate::metrics::Metrics;
use crate::relay::{RelayEngine, UpstreamResponse};
use crate::storage::UploadStore;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info};

/// Header naming the file of a single-shot upload
pub const FILENAME_HEADER: &str = "x-filename";

/// Shared application state for handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<RelayEngine>,
    pub store: Arc<UploadStore>,
    pub metrics: Arc<Metrics>,
    pub start_time: SystemTime,
}

/// Entry of the token endpoint's reply
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Reply to a stored single-shot upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub uptime_seconds: u64,
    pub active_relays: i64,
    pub version: String,
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let uptime = SystemTime::now()
        .duration_since(state.start_time)
        .unwrap_or_default()
        .as_secs();

    Json(HealthStatus {
        status: "healthy".to_string(),
        uptime_seconds: uptime,
        active_relays: state.metrics.active_relays(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus scrape endpoint
pub async fn export_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.export_prometheus() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to export metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Hand out the configured upload token
pub async fn issue_token(State(state): State<AppState>) -> Result<Json<Vec<TokenResponse>>, UploadError> {
    let token = state.config.auth.issuer_token.clone().ok_or(UploadError::NotFound)?;
    debug!("Issuing upload token");
    Ok(Json(vec![TokenResponse { token }]))
}

/// Stream the request body to the upstream and mirror its answer
pub async fn stream_upload(State(state): State<AppState>, body: Body) -> Result<UpstreamResponse, UploadError> {
    let response = state.relay.relay(body.into_data_stream()).await?;
    Ok(response)
}

/// Streaming sink: append every received chunk to the sink file
pub async fn upload_stream_sink(State(state): State<AppState>, body: Body) -> Result<&'static str, UploadError> {
    let written = state.store.append_stream(body.into_data_stream()).await?;
    info!(bytes = written, "Streamed upload received");
    Ok("ok")
}

/// Single-shot upload of one named file
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, UploadError> {
    let mut names = headers.get_all(FILENAME_HEADER).iter();

    let filename = names.next().ok_or(UploadError::MissingFilename)?;
    if names.next().is_some() {
        return Err(UploadError::MultipleFilesRejected);
    }

    let filename = filename
        .to_str()
        .map_err(|_| UploadError::InvalidFilename("<non-ascii>".to_string()))?;

    state.store.append(filename, &body).await?;
    state.metrics.upload_stored();

    Ok(Json(UploadResponse {
        message: "file uploaded".to_string(),
    }))
}
