use std::sync::Arc;

use async_trait::async_trait;
use corelib::types::run_state::RunState;

use super::{EventSink, OutputHandler};

/// Updates the `metrics` counters/gauges the rest of the process exports
/// through the Prometheus exporter wired up in `conductord`.
pub struct MonitoringHandler;

#[async_trait]
impl OutputHandler for MonitoringHandler {
    async fn transition_into(&self, run_state: &RunState, _sink: Arc<dyn EventSink>) {
        metrics::increment_counter!(
            "engine.state_transitions_total",
            "state" => run_state.state.as_config_key(),
        );
        if run_state.state.is_terminal() {
            metrics::decrement_gauge!("engine.active_instances", 1.0);
        }
    }
}
