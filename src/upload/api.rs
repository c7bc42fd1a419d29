//! Upload API Routes

use super::handlers::*;
use crate::auth::{require_upload_token, UploadAuth};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};

/// Upload API router
pub struct UploadApi;

impl UploadApi {
    /// Create the upload API router
    pub fn create_router(state: AppState, auth: UploadAuth) -> Router {
        let auth = Arc::new(auth);
        let max_body_size = state.config.server.max_body_size;

        // Public routes (no authentication required)
        let mut public_routes = Router::new()
            .route("/health", get(health_check))
            .route("/upload_token", get(issue_token))
            .route("/upload_stream", post(upload_stream_sink));

        if state.config.monitoring.metrics_enabled {
            public_routes = public_routes.route("/metrics", get(export_metrics));
        }

        // Protected routes (upload token required)
        let protected_routes = Router::new()
            .route("/stream", post(stream_upload))
            .route("/upload", post(upload_file))
            .route_layer(middleware::from_fn_with_state(auth, require_upload_token));

        public_routes
            .merge(protected_routes)
            .with_state(state)
            .layer(DefaultBodyLimit::max(max_body_size))
            .layer(RequestBodyLimitLayer::new(max_body_size))
            .layer(CorsLayer::permissive())
    }
}
