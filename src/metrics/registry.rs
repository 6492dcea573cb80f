//! Registers every phase's metrics and flags name collisions early.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();
    register_phase_metrics::<super::admission::AdmissionMetrics>(&mut all_metrics);
    register_phase_metrics::<super::transport::TransportMetrics>(&mut all_metrics);
    register_phase_metrics::<super::resolver::ResolverMetrics>(&mut all_metrics);
    info!("Registered {} metrics", all_metrics.len());
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<&'static str, MetricDoc>) {
    T::register_metrics();
    for doc in T::metrics_documentation() {
        if all_metrics.contains_key(doc.name) {
            warn!("Metric name conflict: '{}' redefined by phase '{}'", doc.name, T::phase_name());
        } else {
            debug!(
                name = doc.name,
                kind = ?doc.metric_type,
                labels = ?doc.labels,
                help = doc.help,
                "Registered metric"
            );
            all_metrics.insert(doc.name, doc);
        }
    }
}

/// Phase segment of a metric name, e.g. `ingest_resolver_verdicts_total` -> `resolver`
pub fn phase_of(metric_name: &str) -> &str {
    metric_name
        .strip_prefix("ingest_")
        .and_then(|rest| rest.split('_').next())
        .unwrap_or("unknown")
}
