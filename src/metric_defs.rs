use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Adds description/help text to the metrics emitted to the Prometheus
/// sink, the way the teacher's `cronback/src/metric_defs.rs` does.
pub(crate) fn install_metrics() {
    describe_counter!(
        "engine.state_transitions_total",
        Unit::Count,
        "Total RunState transitions applied by the state manager"
    );
    describe_gauge!(
        "engine.active_instances",
        Unit::Count,
        "Instances currently in a non-terminal RunState"
    );

    describe_counter!(
        "api.http_requests_total",
        Unit::Count,
        "Total HTTP API requests processed"
    );
    describe_histogram!(
        "api.http_requests_duration_seconds",
        Unit::Seconds,
        "HTTP API request processing latency"
    );
}
