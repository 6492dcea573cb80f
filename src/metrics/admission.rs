//! Rate limiter admission metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct AdmissionMetrics;

impl AdmissionMetrics {
    pub fn record_admitted(key: &str, waited_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "admission", "granted"), "key" => key.to_string()).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "admission", "wait_seconds"), "key" => key.to_string())
            .record(waited_secs);
    }

    pub fn record_rejected(key: &str) {
        ::metrics::counter!(phase_metric!(counter, "admission", "rejected"), "key" => key.to_string()).increment(1);
    }
}

impl PhaseMetrics for AdmissionMetrics {
    fn register_metrics() {
        use metrics::{describe_counter, describe_histogram};
        describe_counter!(
            phase_metric!(counter, "admission", "granted"),
            "Admissions granted by the rate limiter"
        );
        describe_counter!(
            phase_metric!(counter, "admission", "rejected"),
            "Fail-fast admissions refused with a required wait"
        );
        describe_histogram!(
            phase_metric!(histogram, "admission", "wait_seconds"),
            "Time spent queued before admission"
        );
    }

    fn phase_name() -> &'static str {
        "admission"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "admission", "granted"),
                metric_type: MetricType::Counter,
                help: "Admissions granted by the rate limiter",
                labels: vec!["key"],
            },
            MetricDoc {
                name: phase_metric!(counter, "admission", "rejected"),
                metric_type: MetricType::Counter,
                help: "Fail-fast admissions refused with a required wait",
                labels: vec!["key"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "admission", "wait_seconds"),
                metric_type: MetricType::Histogram,
                help: "Time spent queued before admission",
                labels: vec!["key"],
            },
        ]
    }
}
