//! Relay Engine

use anyhow::Context;
use bytes::Bytes;
use futures::{FutureExt, Stream};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::metrics::Metrics;
use crate::Result;
use super::body::OutboundBodySource;
use super::channel::relay_channel;
use super::receiver::InboundChunkReceiver;
use super::session::{OutboundResponse, RelaySession, RelayStats, UpstreamResponse};
use super::RelayError;

/// Streams inbound uploads to a fixed upstream endpoint
#[derive(Debug, Clone)]
pub struct RelayEngine {
    client: reqwest::Client,
    upstream_url: reqwest::Url,
    deadline: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl RelayEngine {
    /// Create a new relay engine for `upstream_url` with the given deadline
    pub fn new(upstream_url: &str, deadline: Duration) -> Result<Self> {
        let upstream_url = reqwest::Url::parse(upstream_url)
            .with_context(|| format!("Invalid upstream URL: {}", upstream_url))?;

        let client = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            client,
            upstream_url,
            deadline,
            metrics: None,
        })
    }

    /// Create a new relay engine from configuration
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::new(&config.upstream_url, config.request_timeout)
    }

    /// Record relay outcomes in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn upstream_url(&self) -> &str {
        self.upstream_url.as_str()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Open a session: the relay channel plus the not yet started outbound request
    pub fn open_session(&self) -> RelaySession {
        let session_id = format!("relay_{}", uuid::Uuid::new_v4().simple());
        let cancel = CancellationToken::new();
        let stats = Arc::new(RelayStats::default());

        let (sender, receiver) = relay_channel(cancel.clone());
        let body = OutboundBodySource::new(receiver, stats.clone()).into_body();
        let outbound = self.outbound_request(body);

        RelaySession::new(
            session_id,
            InboundChunkReceiver::new(sender, stats.clone()),
            outbound,
            stats,
            cancel,
            self.deadline,
        )
    }

    /// Relay one inbound body and return the upstream's answer.
    ///
    /// Metrics are recorded even if the returned future is dropped before it
    /// completes; such a relay counts as `cancelled`.
    pub async fn relay<S, E>(&self, inbound: S) -> std::result::Result<UpstreamResponse, RelayError>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: fmt::Display,
    {
        let mut session = self.open_session();
        info!(
            session_id = %session.session_id,
            upstream = %self.upstream_url,
            "Starting streaming relay"
        );

        let recorder = RelayRecorder::start(self.metrics.clone(), &session);
        let outcome = session.run(inbound).await;
        session.log_stats();
        recorder.finish(outcome.as_ref().err().map(RelayError::kind));

        outcome
    }

    fn outbound_request(&self, body: reqwest::Body) -> OutboundResponse {
        let request = self
            .client
            .post(self.upstream_url.clone())
            .timeout(self.deadline)
            .body(body);
        let deadline = self.deadline;

        async move {
            let response = request
                .send()
                .await
                .map_err(|e| RelayError::from_upstream(e, deadline))?;

            let status = response.status();
            debug!(status = status.as_u16(), "Upstream responded, reading body");

            let body = response
                .bytes()
                .await
                .map_err(|e| RelayError::from_upstream(e, deadline))?;

            Ok::<_, RelayError>(UpstreamResponse { status, body })
        }
        .boxed()
    }
}

/// Records the end of one relay in metrics, also when the relay is dropped
/// before it returns
struct RelayRecorder {
    metrics: Option<Arc<Metrics>>,
    stats: Arc<RelayStats>,
    session_id: String,
    started: Instant,
    finished: bool,
}

impl RelayRecorder {
    fn start(metrics: Option<Arc<Metrics>>, session: &RelaySession) -> Self {
        if let Some(metrics) = &metrics {
            metrics.relay_started();
        }

        Self {
            metrics,
            stats: session.shared_stats(),
            session_id: session.session_id.clone(),
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, failure: Option<&str>) {
        self.record(failure);
        self.finished = true;
    }

    fn record(&self, failure: Option<&str>) {
        if let Some(metrics) = &self.metrics {
            metrics.relay_finished(failure, self.stats.bytes_sent(), self.started.elapsed());
        }
    }
}

impl Drop for RelayRecorder {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        warn!(
            session_id = %self.session_id,
            bytes_received = self.stats.bytes_received(),
            bytes_sent = self.stats.bytes_sent(),
            "Relay dropped before completion"
        );
        self.record(Some(RelayError::Cancelled.kind()));
    }
}
