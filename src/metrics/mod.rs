//! Metrics for the ingestion engine
//!
//! Each component defines its metrics in a dedicated submodule so names stay
//! owned by one place. Recording is a no-op until a recorder is installed by
//! [`init_metrics`].

pub mod admission;
pub mod registry;
pub mod resolver;
pub mod transport;

pub use admission::AdmissionMetrics;
pub use resolver::ResolverMetrics;
pub use transport::TransportMetrics;

use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install the Prometheus exporter when `INGEST_METRICS_ADDR` is set.
///
/// Idempotent. Without the variable nothing is installed and every metric
/// call stays a cheap no-op.
pub fn init_metrics() {
    INIT.call_once(|| {
        let addr_str = match std::env::var("INGEST_METRICS_ADDR") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return,
        };
        let addr = match addr_str.parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid metrics addr '{}': {}", addr_str, e);
                return;
            }
        };
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => {
                info!("Prometheus exporter listening on http://{}/metrics", addr);
                registry::register_all_metrics();
            }
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    });
}

/// Implemented by each component's metrics collection
pub trait PhaseMetrics {
    /// Describe every metric of this phase to the installed recorder
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub enum MetricType {
    Counter,
    Histogram,
}

/// Metric names follow `ingest_{phase}_{metric_name}[_total]`
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("ingest_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("ingest_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
