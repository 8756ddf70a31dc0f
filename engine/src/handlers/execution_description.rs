use std::sync::Arc;

use async_trait::async_trait;
use corelib::database::workflow_store::WorkflowStore;
use corelib::types::event::EventKind;
use corelib::types::run_state::{RunState, State};

use super::{EventSink, OutputHandler};
use crate::runner::ExecutionDescription;

/// On `PREPARE`, resolves the instance's workflow configuration into an
/// [`ExecutionDescription`] and emits `submit`. If the workflow has since
/// become unconfigured or disabled, emits `runError` instead — the instance
/// was already queued under a configuration that no longer holds.
pub struct ExecutionDescriptionHandler {
    workflow_store: Arc<dyn WorkflowStore>,
}

impl ExecutionDescriptionHandler {
    pub fn new(workflow_store: Arc<dyn WorkflowStore>) -> Self {
        Self { workflow_store }
    }
}

#[async_trait]
impl OutputHandler for ExecutionDescriptionHandler {
    async fn transition_into(&self, run_state: &RunState, sink: Arc<dyn EventSink>) {
        if run_state.state != State::Prepare {
            return;
        }

        let workflow = match self.workflow_store.get(&run_state.instance.workflow_id).await {
            | Ok(Some(workflow)) => workflow,
            | Ok(None) => {
                tracing::warn!(instance = %run_state.instance, "workflow vanished before PREPARE");
                sink.emit(
                    run_state.instance.clone(),
                    EventKind::RunError { message: "workflow no longer registered".to_string() },
                )
                .await;
                return;
            }
            | Err(err) => {
                tracing::warn!(%err, instance = %run_state.instance, "failed to load workflow for PREPARE");
                return;
            }
        };

        match ExecutionDescription::resolve(&workflow.configuration) {
            | Some(description) => {
                let payload = serde_json::json!({
                    "image": description.image,
                    "command": description.command,
                });
                sink.emit(
                    run_state.instance.clone(),
                    EventKind::Submit { execution_description: payload },
                )
                .await;
            }
            | None => {
                sink.emit(
                    run_state.instance.clone(),
                    EventKind::RunError { message: "workflow is not configured".to_string() },
                )
                .await;
            }
        }
    }
}
