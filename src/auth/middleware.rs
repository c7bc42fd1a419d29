//! Upload Authentication Middleware

use super::{AllowAll, StaticTokenVerifier, TokenVerifier};
use crate::config::AuthConfig;
use crate::error::UploadError;
use crate::metrics::Metrics;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Guards upload routes with a token check
pub struct UploadAuth {
    verifier: Arc<dyn TokenVerifier>,
    required_role: String,
    max_age: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl fmt::Debug for UploadAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadAuth")
            .field("required_role", &self.required_role)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl UploadAuth {
    pub fn new(verifier: Arc<dyn TokenVerifier>, required_role: impl Into<String>, max_age: Duration) -> Self {
        Self {
            verifier,
            required_role: required_role.into(),
            max_age,
            metrics: None,
        }
    }

    /// Build the guard described by `config`
    pub fn from_config(config: &AuthConfig) -> Self {
        let verifier: Arc<dyn TokenVerifier> = if config.enabled {
            let tokens = StaticTokenVerifier::from_config(config);
            if tokens.is_empty() {
                warn!("Authentication enabled but no upload tokens configured, every upload will be rejected");
            } else {
                debug!(tokens = tokens.len(), "Loaded upload tokens");
            }
            Arc::new(tokens)
        } else {
            Arc::new(AllowAll)
        };
        Self::new(verifier, config.required_role.clone(), config.max_token_age)
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Check the token carried by `headers`
    pub fn authenticate(&self, headers: &HeaderMap) -> bool {
        let token = extract_token(headers).unwrap_or_default();

        if self.verifier.verify(token, &self.required_role, self.max_age) {
            debug!("Upload token accepted");
            return true;
        }

        warn!("Upload token rejected");
        if let Some(metrics) = &self.metrics {
            metrics.auth_rejected();
        }
        false
    }
}

/// Token from the `Authorization` header, with or without a `Bearer` prefix
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    Some(value.strip_prefix("Bearer ").unwrap_or(value).trim())
}

/// Authentication middleware function
pub async fn require_upload_token(
    State(auth): State<Arc<UploadAuth>>,
    request: Request,
    next: Next,
) -> Result<Response, UploadError> {
    if auth.authenticate(request.headers()) {
        Ok(next.run(request).await)
    } else {
        Err(UploadError::AuthRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::SystemTime;

    fn guard() -> UploadAuth {
        let mut verifier = StaticTokenVerifier::new();
        verifier.insert("good-token", "app_user", SystemTime::now());
        UploadAuth::new(Arc::new(verifier), "app_user", Duration::from_secs(3600))
    }

    #[test]
    fn test_bearer_token() {
        let auth = guard();
        let mut headers = HeaderMap::new();

        assert!(!auth.authenticate(&headers));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer good-token"));
        assert!(auth.authenticate(&headers));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer bad-token"));
        assert!(!auth.authenticate(&headers));
    }

    #[test]
    fn test_bare_token() {
        let auth = guard();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("good-token"));

        assert!(auth.authenticate(&headers));
    }

    #[test]
    fn test_disabled_auth() {
        let config = AuthConfig {
            enabled: false,
            ..crate::config::Config::default().auth
        };
        let auth = UploadAuth::from_config(&config);

        assert!(auth.authenticate(&HeaderMap::new()));
    }
}
