//! Authentication Module
//!
//! Token checks applied before any upload is accepted.

pub mod middleware;
pub mod verifier;

pub use middleware::{extract_token, require_upload_token, UploadAuth};
pub use verifier::{AllowAll, StaticTokenVerifier, TokenVerifier};
