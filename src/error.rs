//! HTTP-facing upload errors

use crate::relay::RelayError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors returned by the upload routes
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("missing, invalid or expired upload token")]
    AuthRejected,

    #[error("only one file per request is allowed")]
    MultipleFilesRejected,

    #[error("no filename supplied")]
    MissingFilename,

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl UploadError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::AuthRejected => StatusCode::UNAUTHORIZED,
            UploadError::MultipleFilesRejected
            | UploadError::MissingFilename
            | UploadError::InvalidFilename(_) => StatusCode::BAD_REQUEST,
            UploadError::NotFound => StatusCode::NOT_FOUND,
            UploadError::Relay(RelayError::UpstreamUnreachable(_)) => StatusCode::BAD_GATEWAY,
            UploadError::Relay(RelayError::UpstreamTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            UploadError::Relay(RelayError::InboundAborted(_)) => StatusCode::BAD_REQUEST,
            UploadError::Relay(_) | UploadError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Upload request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(UploadError::AuthRejected.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(UploadError::MultipleFilesRejected.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            UploadError::from(RelayError::UpstreamUnreachable("refused".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            UploadError::from(RelayError::UpstreamTimeout(Duration::from_secs(1))).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            UploadError::from(RelayError::Cancelled).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
