//! Upload Relay Library
//!
//! File upload service whose `/stream` route re-streams the request body to an
//! upstream HTTP endpoint while it is still being received, with bounded
//! buffering and backpressure between the two connections.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod shutdown;
pub mod storage;
pub mod upload;

pub use config::Config;
pub use error::UploadError;
pub use relay::RelayEngine;
pub use shutdown::ShutdownCoordinator;
pub use upload::UploadServer;

/// Common error type for service setup
pub type Result<T> = anyhow::Result<T>;
