//! Streaming Relay Module
//!
//! Re-streams an inbound request body as the body of an outbound request while
//! the inbound body is still arriving.

pub mod body;
pub mod channel;
pub mod engine;
pub mod error;
pub mod receiver;
pub mod session;

pub use body::OutboundBodySource;
pub use channel::{relay_channel, RelayMessage, RelayReceiver, RelaySender, RELAY_CHANNEL_CAPACITY};
pub use engine::RelayEngine;
pub use error::RelayError;
pub use receiver::InboundChunkReceiver;
pub use session::{RelaySession, RelayState, RelayStats, UpstreamResponse};
