use std::sync::Arc;

use async_trait::async_trait;
use corelib::types::event::EventKind;
use corelib::types::run_state::{RunState, State};

use super::{EventSink, OutputHandler};
use crate::retry::RetryPolicy;

/// On `TERMINATED`, computes the next retry delay from the instance's
/// accumulated `retryCost` and emits `retryAfter` — or, once `max_attempts`
/// is exhausted, emits `runError` so the state machine routes to `FAILED`.
pub struct TerminationHandler {
    policy: RetryPolicy,
    max_attempts: u32,
}

impl TerminationHandler {
    pub fn new(policy: RetryPolicy, max_attempts: u32) -> Self {
        Self { policy, max_attempts }
    }
}

#[async_trait]
impl OutputHandler for TerminationHandler {
    async fn transition_into(&self, run_state: &RunState, sink: Arc<dyn EventSink>) {
        if run_state.state != State::Terminated {
            return;
        }

        if run_state.data.retry_cost >= self.max_attempts {
            sink.emit(
                run_state.instance.clone(),
                EventKind::RunError { message: "retry attempts exhausted".to_string() },
            )
            .await;
            return;
        }

        let delay = self.policy.with_jitter(run_state.data.retry_cost);
        sink.emit(
            run_state.instance.clone(),
            EventKind::RetryAfter { delay_ms: delay.as_millis() as u64 },
        )
        .await;
    }
}
