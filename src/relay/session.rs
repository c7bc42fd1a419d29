//! Relay Session
//!
//! One session ties a single inbound upload to a single outbound request. It is
//! created when the upload handler starts and dropped when the handler returns;
//! dropping it cancels anything still waiting on the relay channel.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::Stream;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::receiver::InboundChunkReceiver;
use super::RelayError;

/// Pending outbound request, resolved once the upstream has answered
pub type OutboundResponse = BoxFuture<'static, Result<UpstreamResponse, RelayError>>;

/// Lifecycle of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    AwaitingUpstreamResponse,
    Completed,
    Failed,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RelayState::Completed | RelayState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: RelayState) -> bool {
        use RelayState::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Idle, Streaming) => true,
            (Streaming, AwaitingUpstreamResponse) => true,
            (Streaming, Completed) | (AwaitingUpstreamResponse, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Idle => "idle",
            RelayState::Streaming => "streaming",
            RelayState::AwaitingUpstreamResponse => "awaiting_upstream_response",
            RelayState::Completed => "completed",
            RelayState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Byte counters shared by both halves of a session
#[derive(Debug, Default)]
pub struct RelayStats {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl RelayStats {
    /// Bytes taken from the client
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Bytes handed to the upstream connection
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Upstream answer mirrored back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

/// State of one inbound-to-outbound relay
pub struct RelaySession {
    pub session_id: String,
    state: RelayState,
    inbound: InboundChunkReceiver,
    outbound: Option<OutboundResponse>,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
    deadline: Duration,
    start_time: Instant,
}

impl fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl RelaySession {
    /// Assemble a session from its channel producer and pending outbound request
    pub fn new(
        session_id: String,
        inbound: InboundChunkReceiver,
        outbound: OutboundResponse,
        stats: Arc<RelayStats>,
        cancel: CancellationToken,
        deadline: Duration,
    ) -> Self {
        debug!(session_id = %session_id, deadline = ?deadline, "Creating relay session");

        Self {
            session_id,
            state: RelayState::Idle,
            inbound,
            outbound: Some(outbound),
            stats,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            deadline,
            start_time: Instant::now(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Counters that outlive the session
    pub fn shared_stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    /// Whether `EndOfStream` has been pushed for this session
    pub fn end_signaled(&self) -> bool {
        self.inbound.end_signaled()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Token that releases both channel halves when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Relay `inbound` to the upstream and wait for its answer.
    ///
    /// The whole exchange is bounded by the session deadline. On any failure
    /// the outbound request has already been dropped with `drive`, and the
    /// channel is cancelled.
    pub async fn run<S, E>(&mut self, inbound: S) -> Result<UpstreamResponse, RelayError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let outcome = match tokio::time::timeout(self.deadline, self.drive(inbound)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RelayError::UpstreamTimeout(self.deadline)),
        };

        match &outcome {
            Ok(response) => {
                self.transition(RelayState::Completed);
                info!(
                    session_id = %self.session_id,
                    status = response.status.as_u16(),
                    "Upstream response received"
                );
            }
            Err(e) => self.abort(e),
        }

        outcome
    }

    async fn drive<S, E>(&mut self, inbound: S) -> Result<UpstreamResponse, RelayError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let mut outbound = self.outbound.take().ok_or(RelayError::SessionConsumed)?;
        self.transition(RelayState::Streaming);

        let pumped = {
            let pump = self.inbound.receive_all(inbound);
            tokio::pin!(pump);

            // The outbound request is polled first so it is under way before
            // the first inbound chunk is waiting in the channel.
            tokio::select! {
                biased;
                response = &mut outbound => {
                    debug!(session_id = %self.session_id, "Upstream finished before the inbound body");
                    return response;
                }
                pumped = &mut pump => pumped,
            }
        };

        match pumped {
            Ok(bytes) => {
                debug!(session_id = %self.session_id, bytes_received = bytes, "Inbound body complete");
            }
            Err(RelayError::ConsumerGone) => {
                debug!(session_id = %self.session_id, "Outbound body closed early, waiting for upstream");
            }
            Err(e) => return Err(e),
        }

        self.transition(RelayState::AwaitingUpstreamResponse);
        outbound.await
    }

    fn transition(&mut self, next: RelayState) {
        if !self.state.can_transition_to(next) {
            warn!(
                session_id = %self.session_id,
                from = %self.state,
                to = %next,
                "Ignoring invalid relay state transition"
            );
            return;
        }
        debug!(session_id = %self.session_id, from = %self.state, to = %next, "Relay state change");
        self.state = next;
    }

    fn abort(&mut self, error: &RelayError) {
        self.transition(RelayState::Failed);
        self.cancel.cancel();

        warn!(
            session_id = %self.session_id,
            error = %error,
            kind = error.kind(),
            "Relay session failed"
        );
    }

    /// Log session statistics
    pub fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            state = %self.state,
            duration_ms = self.duration().as_millis() as u64,
            bytes_received = self.stats.bytes_received(),
            bytes_sent = self.stats.bytes_sent(),
            "Relay session finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use RelayState::*;

        assert!(Idle.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(AwaitingUpstreamResponse));
        assert!(AwaitingUpstreamResponse.can_transition_to(Completed));
        assert!(Streaming.can_transition_to(Completed));
        assert!(Idle.can_transition_to(Failed));
        assert!(AwaitingUpstreamResponse.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(AwaitingUpstreamResponse));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Streaming));
    }

    #[test]
    fn test_stats_counters() {
        let stats = RelayStats::default();
        stats.add_bytes_received(3);
        stats.add_bytes_received(5);
        stats.add_bytes_sent(8);

        assert_eq!(stats.bytes_received(), 8);
        assert_eq!(stats.bytes_sent(), 8);
    }
}
