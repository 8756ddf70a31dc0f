use std::sync::Arc;

use async_trait::async_trait;
use corelib::database::workflow_store::WorkflowStore;
use corelib::model::ModelId;
use corelib::types::event::EventKind;
use corelib::types::run_state::{RunState, State};
use corelib::types::workflow::WorkflowId;

use super::{EventSink, OutputHandler};
use crate::rate_limiter::RateLimiter;
use crate::runner::{ExecutionDescription, Runner};

/// On `SUBMITTING`, acquires a submission token from C9 and calls the
/// runner's `start`. Once started, a detached task carries the instance
/// through `SUBMITTED` -> `RUNNING` -> a terminal state on its own schedule,
/// since the runner's `terminate` blocks until the execution exits and
/// dispatch must not stall waiting on it (spec.md §4.4, §4.5). On
/// `TERMINATED`/`FAILED`/`DONE`, calls `cleanup` to release whatever the
/// runner allocated.
pub struct DockerRunnerHandler {
    runner: Arc<dyn Runner>,
    rate_limiter: Arc<RateLimiter>,
    workflow_store: Arc<dyn WorkflowStore>,
}

impl DockerRunnerHandler {
    pub fn new(
        runner: Arc<dyn Runner>,
        rate_limiter: Arc<RateLimiter>,
        workflow_store: Arc<dyn WorkflowStore>,
    ) -> Self {
        Self { runner, rate_limiter, workflow_store }
    }
}

#[async_trait]
impl OutputHandler for DockerRunnerHandler {
    async fn transition_into(&self, run_state: &RunState, sink: Arc<dyn EventSink>) {
        match run_state.state {
            | State::Submitting => {
                let Some(description) = run_state.data.execution_description.as_ref() else {
                    sink.emit(
                        run_state.instance.clone(),
                        EventKind::RunError { message: "missing execution description".to_string() },
                    )
                    .await;
                    return;
                };
                let image = description.get("image").and_then(|v| v.as_str()).unwrap_or_default();
                let command = description
                    .get("command")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items.iter().filter_map(|v| v.as_str().map(String::from)).collect()
                    })
                    .unwrap_or_default();
                let description = ExecutionDescription { image: image.to_string(), command };

                self.rate_limiter.acquire().await;
                match self.runner.start(&description).await {
                    | Ok(execution_id) => {
                        sink.emit(
                            run_state.instance.clone(),
                            EventKind::Submitted { execution_id: execution_id.clone() },
                        )
                        .await;
                        self.watch(
                            run_state.instance.workflow_id.clone(),
                            run_state.instance.clone(),
                            execution_id,
                            sink,
                        );
                    }
                    | Err(err) => {
                        sink.emit(
                            run_state.instance.clone(),
                            EventKind::RunError { message: err.to_string() },
                        )
                        .await;
                    }
                }
            }
            | State::Terminated | State::Failed | State::Done => {
                if let Some(execution_id) = run_state.data.execution_id.as_ref() {
                    if let Err(err) = self.runner.cleanup(execution_id.value()).await {
                        tracing::warn!(%err, instance = %run_state.instance, "runner cleanup failed");
                    }
                }
            }
            | _ => {}
        }
    }
}

impl DockerRunnerHandler {
    /// Spawns the task that drives `instance` from `SUBMITTED` to a terminal
    /// outcome: emits `started`, blocks on `runner.terminate`, resolves
    /// success against the workflow's configured exit-code set, and emits
    /// `terminate(exitCode, success)`.
    fn watch(
        &self,
        workflow_id: WorkflowId,
        instance: corelib::types::instance::WorkflowInstance,
        execution_id: String,
        sink: Arc<dyn EventSink>,
    ) {
        let runner = self.runner.clone();
        let workflow_store = self.workflow_store.clone();
        tokio::spawn(async move {
            sink.emit(instance.clone(), EventKind::Started).await;

            let outcome = match runner.terminate(&execution_id).await {
                | Ok(outcome) => outcome,
                | Err(err) => {
                    sink.emit(instance.clone(), EventKind::RunError { message: err.to_string() }).await;
                    return;
                }
            };

            let success = match workflow_store.get(&workflow_id).await {
                | Ok(Some(workflow)) => workflow.configuration.is_success_exit(outcome.exit_code),
                | Ok(None) => outcome.exit_code == 0,
                | Err(err) => {
                    tracing::warn!(%err, %instance, "failed to load workflow configuration for exit resolution");
                    outcome.exit_code == 0
                }
            };

            sink.emit(instance, EventKind::Terminate { exit_code: outcome.exit_code, success }).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use corelib::database::workflow_store::SqlWorkflowStore;
    use corelib::database::Database;
    use corelib::schedule::Schedule;
    use corelib::types::instance::WorkflowInstance;
    use corelib::types::run_state::StateData;
    use corelib::types::workflow::{Configuration, Workflow};
    use tokio::time::{timeout, Duration};

    use super::*;
    use crate::error::EngineError;
    use crate::runner::ExecutionOutcome;

    struct FakeRunner {
        exit_code: i32,
    }

    #[async_trait]
    impl Runner for FakeRunner {
        async fn start(&self, _description: &ExecutionDescription) -> Result<String, EngineError> {
            Ok("exec-1".to_string())
        }

        async fn terminate(&self, _execution_id: &str) -> Result<ExecutionOutcome, EngineError> {
            Ok(ExecutionOutcome { exit_code: self.exit_code })
        }

        async fn cleanup(&self, _execution_id: &str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, _instance: WorkflowInstance, kind: EventKind) {
            self.events.lock().unwrap().push(kind);
        }
    }

    async fn store_with(workflow_id: &str, configuration: Configuration) -> Arc<dyn WorkflowStore> {
        let store = SqlWorkflowStore::new(Database::in_memory().await.unwrap());
        let workflow = Workflow {
            id: WorkflowId::new("demo", workflow_id),
            schedule: Schedule::Days,
            configuration,
            enabled: true,
        };
        store.upsert(&workflow, Utc::now()).await.unwrap();
        Arc::new(store)
    }

    fn submitting_state(instance: WorkflowInstance) -> RunState {
        RunState {
            instance,
            state: State::Submitting,
            data: StateData {
                execution_description: Some(serde_json::json!({"image": "alpine", "command": []})),
                ..Default::default()
            },
            timestamp: Utc::now(),
            counter: 1,
        }
    }

    #[tokio::test]
    async fn submitting_success_drives_to_terminate_success() {
        let workflow_store = store_with("wf-1", Configuration::default()).await;
        let handler = DockerRunnerHandler::new(
            Arc::new(FakeRunner { exit_code: 0 }),
            Arc::new(RateLimiter::new(100.0)),
            workflow_store,
        );
        let sink: Arc<RecordingSink> = Arc::default();
        let instance = WorkflowInstance::new(WorkflowId::new("demo", "wf-1"), "2020-01-01");

        handler.transition_into(&submitting_state(instance), sink.clone()).await;

        timeout(Duration::from_secs(1), async {
            loop {
                if sink.events.lock().unwrap().len() >= 3 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let events = sink.events.lock().unwrap();
        assert!(matches!(events[0], EventKind::Submitted { .. }));
        assert!(matches!(events[1], EventKind::Started));
        assert!(matches!(events[2], EventKind::Terminate { exit_code: 0, success: true }));
    }

    #[tokio::test]
    async fn configured_success_exit_code_resolves_success() {
        let workflow_store =
            store_with("wf-2", Configuration { success_exit_codes: vec![75], ..Default::default() }).await;
        let handler = DockerRunnerHandler::new(
            Arc::new(FakeRunner { exit_code: 75 }),
            Arc::new(RateLimiter::new(100.0)),
            workflow_store,
        );
        let sink: Arc<RecordingSink> = Arc::default();
        let instance = WorkflowInstance::new(WorkflowId::new("demo", "wf-2"), "2020-01-01");

        handler.transition_into(&submitting_state(instance), sink.clone()).await;

        timeout(Duration::from_secs(1), async {
            loop {
                if sink.events.lock().unwrap().len() >= 3 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let events = sink.events.lock().unwrap();
        assert!(matches!(events[2], EventKind::Terminate { exit_code: 75, success: true }));
    }
}
