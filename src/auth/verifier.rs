//! Token Verification

use crate::config::AuthConfig;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Decides whether a presented token grants upload access
pub trait TokenVerifier: Send + Sync {
    /// `true` when `token` carries `expected_role` and is younger than `max_age`
    fn verify(&self, token: &str, expected_role: &str, max_age: Duration) -> bool;
}

/// Accepts every token. Used when authentication is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl TokenVerifier for AllowAll {
    fn verify(&self, _token: &str, _expected_role: &str, _max_age: Duration) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
struct TokenGrant {
    role: String,
    issued_at: SystemTime,
}

/// Verifier backed by the token table in the configuration
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    grants: HashMap<String, TokenGrant>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        let mut verifier = Self::new();
        for token in &config.tokens {
            verifier.insert(&token.token, &token.role, token.issued_at);
        }
        verifier
    }

    /// Register `token` for `role`, issued at `issued_at`
    pub fn insert(&mut self, token: &str, role: &str, issued_at: SystemTime) {
        self.grants.insert(
            token.to_string(),
            TokenGrant {
                role: role.to_string(),
                issued_at,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str, expected_role: &str, max_age: Duration) -> bool {
        let Some(grant) = self.grants.get(token) else {
            debug!("Unknown upload token presented");
            return false;
        };

        if grant.role != expected_role {
            debug!(role = %grant.role, expected = %expected_role, "Token role mismatch");
            return false;
        }

        // tokens issued in the future count as age zero
        let age = SystemTime::now()
            .duration_since(grant.issued_at)
            .unwrap_or_default();

        if age > max_age {
            debug!(age = ?age, max_age = ?max_age, "Token expired");
            return false;
        }

        true
    }
}
