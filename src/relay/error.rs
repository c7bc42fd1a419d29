//! Relay Errors

use std::time::Duration;
use thiserror::Error;

/// Failures that can end a relay session
#[derive(Debug, Error)]
pub enum RelayError {
    /// The client stopped sending before the request body was complete
    #[error("inbound request aborted: {0}")]
    InboundAborted(String),

    /// The outbound request could not be delivered to the upstream
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The relay did not finish within its deadline
    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    /// The session was cancelled while a channel operation was pending
    #[error("relay session cancelled")]
    Cancelled,

    /// The outbound body source went away before the inbound body was drained
    #[error("outbound body consumer is gone")]
    ConsumerGone,

    /// A message was sent or requested after end of stream
    #[error("relay stream already closed")]
    StreamClosed,

    /// The session was already run once
    #[error("relay session already consumed")]
    SessionConsumed,
}

impl RelayError {
    /// Short label used for logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InboundAborted(_) => "inbound_aborted",
            RelayError::UpstreamUnreachable(_) => "upstream_unreachable",
            RelayError::UpstreamTimeout(_) => "upstream_timeout",
            RelayError::Cancelled => "cancelled",
            RelayError::ConsumerGone => "consumer_gone",
            RelayError::StreamClosed => "stream_closed",
            RelayError::SessionConsumed => "session_consumed",
        }
    }

    /// Map an outbound client error onto the relay error kinds
    pub(crate) fn from_upstream(error: reqwest::Error, deadline: Duration) -> Self {
        if error.is_timeout() {
            RelayError::UpstreamTimeout(deadline)
        } else {
            RelayError::UpstreamUnreachable(error.to_string())
        }
    }
}
