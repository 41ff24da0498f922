//! Observability utilities for the webshop backend.
//!
//! This crate provides:
//! - The [`Telemetry`] handle: named counters/gauges/histograms, trace
//!   spans, and Prometheus rendering behind one explicitly-owned object
//! - Axum middleware for automatic HTTP request metrics
//! - A tower layer for automatic gRPC request metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use metrics::Unit;
//! use observability::Telemetry;
//!
//! let telemetry = Telemetry::new("webshop-api", "1.0.0")?;
//! let orders = telemetry.counter("orders_total", Unit::Count, "Orders accepted");
//! orders.increment(1);
//!
//! // Render for the /metrics endpoint
//! let exposition = telemetry.render();
//!
//! // Flush exactly once at teardown
//! telemetry.close()?;
//! ```

pub mod middleware;
pub mod rpc;

pub use middleware::metrics_middleware;
pub use rpc::RpcMetricsLayer;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{Counter, Gauge, Histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, info, Span};

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install Prometheus recorder: {0}")]
    Recorder(String),
}

/// Handle to the process's telemetry pipeline.
///
/// The `metrics` crate allows a single recorder per process, so the
/// underlying Prometheus recorder is installed once and shared; the handle
/// itself is constructed explicitly and passed to whoever needs to create
/// instruments or render the exposition. `close` flushes and is a no-op
/// after the first call.
pub struct Telemetry {
    service: String,
    version: String,
    handle: PrometheusHandle,
    closed: AtomicBool,
}

impl Telemetry {
    pub fn new(
        service: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, TelemetryError> {
        let handle = METRICS_HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .map_err(|e| TelemetryError::Recorder(e.to_string()))
            })?
            .clone();

        let telemetry = Self {
            service: service.into(),
            version: version.into(),
            handle,
            closed: AtomicBool::new(false),
        };

        info!(
            service = %telemetry.service,
            version = %telemetry.version,
            "Telemetry initialized"
        );

        Ok(telemetry)
    }

    /// Create a described counter.
    pub fn counter(&self, name: &'static str, unit: Unit, description: &'static str) -> Counter {
        metrics::describe_counter!(name, unit, description);
        metrics::counter!(name, "service" => self.service.clone())
    }

    /// Create a described gauge.
    pub fn gauge(&self, name: &'static str, unit: Unit, description: &'static str) -> Gauge {
        metrics::describe_gauge!(name, unit, description);
        metrics::gauge!(name, "service" => self.service.clone())
    }

    /// Create a described histogram.
    pub fn histogram(&self, name: &'static str, unit: Unit, description: &'static str) -> Histogram {
        metrics::describe_histogram!(name, unit, description);
        metrics::histogram!(name, "service" => self.service.clone())
    }

    /// Open a named span as a child of the current context.
    pub fn span(&self, name: &str) -> Span {
        tracing::info_span!("operation", otel.name = %name, service = %self.service)
    }

    /// Render the current Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Flush the pipeline. The first call drains pending histogram data;
    /// subsequent calls are no-ops.
    pub fn close(&self) -> Result<(), TelemetryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(service = %self.service, "Telemetry already closed");
            return Ok(());
        }
        self.handle.run_upkeep();
        info!(service = %self.service, "Telemetry closed");
        Ok(())
    }
}

/// Axum handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    match METRICS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_new_is_idempotent() {
        let first = Telemetry::new("svc-a", "1.0.0").unwrap();
        let second = Telemetry::new("svc-b", "1.0.0").unwrap();
        assert_eq!(first.service(), "svc-a");
        assert_eq!(second.service(), "svc-b");
    }

    #[test]
    fn test_counter_shows_up_in_render() {
        let telemetry = Telemetry::new("render-test", "1.0.0").unwrap();
        let counter = telemetry.counter(
            "render_test_total",
            Unit::Count,
            "Counter used by the render test",
        );
        counter.increment(3);
        let exposition = telemetry.render();
        assert!(exposition.contains("render_test_total"));
    }

    #[test]
    fn test_close_twice_is_safe() {
        let telemetry = Telemetry::new("close-test", "1.0.0").unwrap();
        assert!(telemetry.close().is_ok());
        assert!(telemetry.close().is_ok());
    }
}
