/*!
Observability infrastructure for the Chronicle engine.

This module provides:
- Structured logging setup on top of `tracing-subscriber`
- Prometheus metrics for captures, restores and retention (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::{Duration, Instant};
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{ChronicleError, Result};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<ChronicleMetrics> = OnceLock::new();

/// Metrics collection for snapshot operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct ChronicleMetrics {
    pub captures_total: Counter,
    pub capture_failures_total: Counter,
    pub capture_latency_seconds: Histogram,
    pub restores_total: Counter,
    pub purged_records_total: Counter,
    pub payload_size_bytes: Histogram,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> ChronicleError {
    ChronicleError::validation(format!("Failed to set up metric {name}: {e}"))
}

#[cfg(feature = "metrics")]
impl ChronicleMetrics {
    /// Initialize new metrics instance
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<Counter> {
            let counter = Counter::new(name, help).map_err(|e| metric_error(name, e))?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| metric_error(name, e))?;
            Ok(counter)
        };
        let captures_total = counter("chronicle_captures_total", "Snapshots captured")?;
        let capture_failures_total =
            counter("chronicle_capture_failures_total", "Snapshot captures that failed")?;
        let restores_total = counter("chronicle_restores_total", "Snapshots restored")?;
        let purged_records_total = counter(
            "chronicle_purged_records_total",
            "Records removed by retention",
        )?;

        let histogram = |name: &str, help: &str, buckets: Vec<f64>| -> Result<Histogram> {
            let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
                .map_err(|e| metric_error(name, e))?;
            registry
                .register(Box::new(histogram.clone()))
                .map_err(|e| metric_error(name, e))?;
            Ok(histogram)
        };
        let capture_latency_seconds = histogram(
            "chronicle_capture_latency_seconds",
            "Duration of serialize-and-save in seconds",
            prometheus::DEFAULT_BUCKETS.to_vec(),
        )?;
        let payload_size_bytes = histogram(
            "chronicle_payload_size_bytes",
            "Size of captured payloads in bytes",
            prometheus::exponential_buckets(64.0, 4.0, 10).map_err(|e| {
                metric_error("chronicle_payload_size_bytes", e)
            })?,
        )?;

        Ok(Self {
            captures_total,
            capture_failures_total,
            capture_latency_seconds,
            restores_total,
            purged_records_total,
            payload_size_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> Result<&'static ChronicleMetrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }
        // A concurrent initializer may win the race; its instance is kept.
        let _ = METRICS.set(Self::new()?);
        METRICS
            .get()
            .ok_or_else(|| ChronicleError::validation("Metrics registry unavailable"))
    }

    /// Record a stored snapshot and its payload size
    pub fn record_capture(&self, size_bytes: usize, duration: Duration) {
        self.captures_total.inc();
        self.payload_size_bytes.observe(size_bytes as f64);
        self.capture_latency_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures_total.inc();
    }

    pub fn record_restore(&self) {
        self.restores_total.inc();
    }

    pub fn record_purged(&self, count: usize) {
        self.purged_records_total.inc_by(count as f64);
    }

    /// Gather metrics in Prometheus format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ChronicleError::serialization(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            ChronicleError::serialization(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Measures one capture from serialization to storage
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Complete the timer, recording a successful capture
    pub fn finish(self, size_bytes: usize) {
        if let Ok(metrics) = ChronicleMetrics::global() {
            metrics.record_capture(size_bytes, self.start.elapsed());
        }
    }

    /// Complete the timer with an error
    pub fn finish_with_error(self) {
        if let Ok(metrics) = ChronicleMetrics::global() {
            metrics.record_capture_failure();
        }
    }
}

/// Initialize the global logging subscriber
///
/// The filter is read from `RUST_LOG` and always includes `chronicle=info`.
/// With `json` set, events are emitted as one JSON object per line.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    ChronicleMetrics::global()?;

    let directive = "chronicle=info"
        .parse::<Directive>()
        .map_err(|e| ChronicleError::validation(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };
    result.map_err(|e| {
        ChronicleError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("Chronicle observability initialized");
    Ok(())
}
