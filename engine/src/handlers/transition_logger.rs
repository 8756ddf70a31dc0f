use std::sync::Arc;

use async_trait::async_trait;
use corelib::types::run_state::RunState;

use super::{EventSink, OutputHandler};

/// A structured log line per transition — first handler in the chain so
/// every transition is observable even if a later handler panics.
pub struct TransitionLogger;

#[async_trait]
impl OutputHandler for TransitionLogger {
    async fn transition_into(&self, run_state: &RunState, _sink: Arc<dyn EventSink>) {
        tracing::info!(
            target: "transitions",
            instance = %run_state.instance,
            state = %run_state.state,
            counter = run_state.counter,
            "state transition",
        );
    }
}
