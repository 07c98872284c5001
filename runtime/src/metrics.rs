//! Prometheus metrics for observability and monitoring.
//!
//! This module installs the process-wide Prometheus recorder and describes
//! the metrics emitted by the runtime itself:
//! - Effect execution
//! - Commit retries
//! - Store commit latency
//!
//! Domain crates describe their own business metrics on top of these.
//!
//! # Example
//!
//! ```rust,no_run
//! use meetreg_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // Scrape text for a /metrics endpoint
//! let text = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics exporter.
///
/// Owns the handle used to render the scrape text. Only the first exporter
/// installed in a process gets a handle; later installs keep recording into
/// the global recorder but cannot render.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe runtime metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter configuration is invalid.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by another test), the call
    /// succeeds with a warning and [`handle`](Self::handle) stays `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build_recorder();
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_ok() {
            register_metrics();
            self.handle = Some(handle);
            tracing::info!("Prometheus metrics recorder installed");
        } else {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
        }

        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter does not own the installed recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register runtime metric descriptions.
fn register_metrics() {
    // Effect Metrics
    describe_counter!("effects_executed_total", "Total number of effects executed");
    describe_gauge!("effects_pending", "Effects spawned but not yet finished");
    describe_histogram!(
        "effect_execution_duration_seconds",
        "Time taken to execute effects"
    );

    // Retry Metrics
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );

    // Store Metrics
    describe_histogram!(
        "store_commit_duration_seconds",
        "Time taken to commit a ledger write"
    );
    describe_counter!(
        "store_commit_conflicts_total",
        "Total number of commits rejected by the version check"
    );
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record an effect execution.
    pub fn record_execution(duration: Duration) {
        counter!("effects_executed_total").increment(1);
        histogram!("effect_execution_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record the number of effects still in flight.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_pending(pending: usize) {
        gauge!("effects_pending").set(pending as f64);
    }
}

/// Store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record a commit attempt.
    pub fn record_commit(duration: Duration) {
        histogram!("store_commit_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a commit that lost the version check.
    pub fn record_conflict() {
        counter!("store_commit_conflicts_total").increment(1);
    }
}
