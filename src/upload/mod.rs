//! Upload API Module
//!
//! HTTP routes for token issuance, streaming relay and single-shot uploads.

pub mod api;
pub mod handlers;
pub mod server;

pub use api::UploadApi;
pub use handlers::AppState;
pub use server::UploadServer;
