//! Transport attempt and backoff metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};
use crate::types::TransportKind;

pub struct TransportMetrics;

impl TransportMetrics {
    pub fn record_attempt(key: &str, transport: Option<TransportKind>, success: bool) {
        let transport = transport.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string());
        let outcome = if success { "success" } else { "failure" };
        ::metrics::counter!(
            phase_metric!(counter, "transport", "attempts"),
            "key" => key.to_string(),
            "transport" => transport,
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn record_backoff(delay_secs: f64) {
        ::metrics::histogram!(phase_metric!(histogram, "transport", "backoff_seconds")).record(delay_secs);
    }
}

impl PhaseMetrics for TransportMetrics {
    fn register_metrics() {
        use metrics::{describe_counter, describe_histogram};
        describe_counter!(
            phase_metric!(counter, "transport", "attempts"),
            "Upstream call attempts by transport and outcome"
        );
        describe_histogram!(
            phase_metric!(histogram, "transport", "backoff_seconds"),
            "Backoff slept between retryable failures"
        );
    }

    fn phase_name() -> &'static str {
        "transport"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "transport", "attempts"),
                metric_type: MetricType::Counter,
                help: "Upstream call attempts by transport and outcome",
                labels: vec!["key", "transport", "outcome"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "transport", "backoff_seconds"),
                metric_type: MetricType::Histogram,
                help: "Backoff slept between retryable failures",
                labels: vec![],
            },
        ]
    }
}
