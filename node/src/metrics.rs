//! # Prometheus Metrics
//!
//! Operational metrics for the ledger node, scraped at `/metrics` on the
//! configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `tally` namespace so they do not collide with the default registry.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly: prometheus handles are reference counted internally.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Committed wallet-to-wallet transfers.
    pub transfers_total: IntCounter,
    /// Committed gifts (mints).
    pub mints_total: IntCounter,
    /// Committed spends (burns).
    pub burns_total: IntCounter,
    /// Operations that failed, labelled by error kind.
    pub rejected_operations_total: IntCounterVec,
    /// Number of known wallets.
    pub wallets: IntGauge,
    /// Ledger operation latency in seconds, gateway side.
    pub operation_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("tally".into()), None)
            .expect("failed to create prometheus registry");

        let transfers_total =
            IntCounter::new("transfers_total", "Total number of committed transfers")
                .expect("metric creation");
        registry
            .register(Box::new(transfers_total.clone()))
            .expect("metric registration");

        let mints_total = IntCounter::new("mints_total", "Total number of committed gifts")
            .expect("metric creation");
        registry
            .register(Box::new(mints_total.clone()))
            .expect("metric registration");

        let burns_total = IntCounter::new("burns_total", "Total number of committed spends")
            .expect("metric creation");
        registry
            .register(Box::new(burns_total.clone()))
            .expect("metric registration");

        let rejected_operations_total = IntCounterVec::new(
            Opts::new(
                "rejected_operations_total",
                "Total number of failed ledger operations by error kind",
            ),
            &["kind"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(rejected_operations_total.clone()))
            .expect("metric registration");

        let wallets =
            IntGauge::new("wallets", "Number of known wallets").expect("metric creation");
        registry
            .register(Box::new(wallets.clone()))
            .expect("metric registration");

        let operation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Ledger operation latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            transfers_total,
            mints_total,
            burns_total,
            rejected_operations_total,
            wallets,
            operation_latency_seconds,
        }
    }

    /// Counts a failed operation under its error kind.
    pub fn record_rejection(&self, kind: &str) {
        self.rejected_operations_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
