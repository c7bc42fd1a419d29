//! Metrics Collector

use crate::Result;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Collects relay and upload metrics and exports them for Prometheus
pub struct Metrics {
    registry: Registry,
    relays_total: Counter,
    relays_failed_total: IntCounterVec,
    active_relays: Gauge,
    bytes_relayed_total: Counter,
    relay_duration: Histogram,
    auth_rejections_total: Counter,
    uploads_total: Counter,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("relays_total", &self.relays_total.get())
            .field("active_relays", &self.active_relays.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let relays_total = Counter::new(
            "upload_relay_relays_total",
            "Total number of streaming relays started",
        )?;

        let relays_failed_total = IntCounterVec::new(
            Opts::new("upload_relay_relays_failed_total", "Failed streaming relays by error kind"),
            &["kind"],
        )?;

        let active_relays = Gauge::new(
            "upload_relay_active_relays",
            "Number of relays currently streaming",
        )?;

        let bytes_relayed_total = Counter::new(
            "upload_relay_bytes_relayed_total",
            "Total bytes written to the upstream",
        )?;

        let relay_duration = Histogram::with_opts(
            HistogramOpts::new(
                "upload_relay_relay_duration_seconds",
                "Duration of streaming relays in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 3600.0]),
        )?;

        let auth_rejections_total = Counter::new(
            "upload_relay_auth_rejections_total",
            "Uploads rejected by the token check",
        )?;

        let uploads_total = Counter::new(
            "upload_relay_uploads_total",
            "Single-shot uploads written to storage",
        )?;

        registry.register(Box::new(relays_total.clone()))?;
        registry.register(Box::new(relays_failed_total.clone()))?;
        registry.register(Box::new(active_relays.clone()))?;
        registry.register(Box::new(bytes_relayed_total.clone()))?;
        registry.register(Box::new(relay_duration.clone()))?;
        registry.register(Box::new(auth_rejections_total.clone()))?;
        registry.register(Box::new(uploads_total.clone()))?;

        Ok(Self {
            registry,
            relays_total,
            relays_failed_total,
            active_relays,
            bytes_relayed_total,
            relay_duration,
            auth_rejections_total,
            uploads_total,
        })
    }

    pub fn relay_started(&self) {
        self.relays_total.inc();
        self.active_relays.inc();
    }

    /// Record the end of a relay; `failure` is the error kind if it failed
    pub fn relay_finished(&self, failure: Option<&str>, bytes_sent: u64, duration: Duration) {
        self.active_relays.dec();
        self.bytes_relayed_total.inc_by(bytes_sent as f64);
        self.relay_duration.observe(duration.as_secs_f64());

        if let Some(kind) = failure {
            self.relays_failed_total.with_label_values(&[kind]).inc();
        }

        debug!(failure = ?failure, bytes_sent, "Recorded relay metrics");
    }

    pub fn auth_rejected(&self) {
        self.auth_rejections_total.inc();
    }

    pub fn upload_stored(&self) {
        self.uploads_total.inc();
    }

    pub fn active_relays(&self) -> i64 {
        self.active_relays.get() as i64
    }

    pub fn relays_total(&self) -> u64 {
        self.relays_total.get() as u64
    }

    pub fn relays_failed(&self, kind: &str) -> u64 {
        self.relays_failed_total.with_label_values(&[kind]).get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn export_prometheus(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_lifecycle_counters() {
        let metrics = Metrics::new().unwrap();

        metrics.relay_started();
        assert_eq!(metrics.active_relays(), 1);
        assert_eq!(metrics.relays_total(), 1);

        metrics.relay_finished(Some("upstream_timeout"), 42, Duration::from_millis(10));
        assert_eq!(metrics.active_relays(), 0);
        assert_eq!(metrics.relays_failed("upstream_timeout"), 1);
        assert_eq!(metrics.relays_failed("inbound_aborted"), 0);
    }

    #[test]
    fn test_export_prometheus() {
        let metrics = Metrics::new().unwrap();
        metrics.relay_started();
        metrics.relay_finished(None, 8, Duration::from_millis(5));
        metrics.auth_rejected();

        let text = metrics.export_prometheus().unwrap();
        assert!(text.contains("upload_relay_relays_total 1"));
        assert!(text.contains("upload_relay_bytes_relayed_total 8"));
        assert!(text.contains("upload_relay_auth_rejections_total 1"));
    }
}
