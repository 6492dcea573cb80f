//! Status resolution metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};
use crate::types::{SignalSource, VerdictState};

pub struct ResolverMetrics;

impl ResolverMetrics {
    pub fn record_verdict(state: VerdictState, decided_by: Option<SignalSource>) {
        let source = decided_by.map(|s| s.to_string()).unwrap_or_else(|| "default".to_string());
        ::metrics::counter!(
            phase_metric!(counter, "resolver", "verdicts"),
            "state" => state.to_string(),
            "decided_by" => source
        )
        .increment(1);
    }

    pub fn record_signal_unavailable(source: SignalSource) {
        ::metrics::counter!(
            phase_metric!(counter, "resolver", "signals_unavailable"),
            "source" => source.to_string()
        )
        .increment(1);
    }

    pub fn record_unresolvable() {
        ::metrics::counter!(phase_metric!(counter, "resolver", "unresolvable")).increment(1);
    }
}

impl PhaseMetrics for ResolverMetrics {
    fn register_metrics() {
        use metrics::describe_counter;
        describe_counter!(phase_metric!(counter, "resolver", "verdicts"), "Verdicts returned by state and deciding signal");
        describe_counter!(
            phase_metric!(counter, "resolver", "signals_unavailable"),
            "Signal probes that failed and were treated as inconclusive"
        );
        describe_counter!(
            phase_metric!(counter, "resolver", "unresolvable"),
            "Resolutions where no signal could be obtained"
        );
    }

    fn phase_name() -> &'static str {
        "resolver"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "resolver", "verdicts"),
                metric_type: MetricType::Counter,
                help: "Verdicts returned by state and deciding signal",
                labels: vec!["state", "decided_by"],
            },
            MetricDoc {
                name: phase_metric!(counter, "resolver", "signals_unavailable"),
                metric_type: MetricType::Counter,
                help: "Signal probes that failed and were treated as inconclusive",
                labels: vec!["source"],
            },
            MetricDoc {
                name: phase_metric!(counter, "resolver", "unresolvable"),
                metric_type: MetricType::Counter,
                help: "Resolutions where no signal could be obtained",
                labels: vec![],
            },
        ]
    }
}
