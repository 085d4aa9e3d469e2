//! Prometheus metrics for the pub/sub engine.
//!
//! Exposes exactly the four counters the facade surface names: publish
//! total/success and subscribe total/success, each carrying a `topic` label
//! and an optional `consumer_group` label on the subscribe pair.
//!
//! # Example
//!
//! ```rust,no_run
//! use pubsub_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, Label};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use pubsub_core::capability::Metrics;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns error if the metrics exporter cannot be installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this
    /// allows it and skips re-registration rather than failing.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new();

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "metrics server started");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "app_pubsub_publish_total_count",
        "Total number of publish attempts"
    );
    describe_counter!(
        "app_pubsub_publish_success_count",
        "Total number of successful publishes"
    );
    describe_counter!(
        "app_pubsub_subscribe_total_count",
        "Total number of subscribe attempts"
    );
    describe_counter!(
        "app_pubsub_subscribe_success_count",
        "Total number of successful subscribe deliveries"
    );
}

/// [`Metrics`] implementation backed by the global Prometheus recorder.
/// Bind via `UseMetrics` on the facade; until bound, the core uses
/// [`pubsub_core::capability::NoopMetrics`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

impl Metrics for PrometheusMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let owned: Vec<Label> = labels
            .iter()
            .map(|(k, v)| Label::new((*k).to_string(), (*v).to_string()))
            .collect();
        counter!(name.to_string(), owned).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_start() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_prometheus_metrics_increment_is_visible_in_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        PrometheusMetrics.increment("app_pubsub_publish_total_count", &[("topic", "orders")]);

        if let Some(rendered) = server.render() {
            assert!(rendered.contains("app_pubsub_publish_total_count"));
        }
    }
}
