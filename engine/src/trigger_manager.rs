//! Trigger Manager (C7): a non-overlapping periodic sweep over registered
//! workflows, emitting `triggerExecution` for whichever have crossed their
//! `nextNaturalTrigger` and atomically advancing the cursor (spec.md §4.7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use corelib::database::workflow_store::WorkflowStore;
use corelib::generate_natural_trigger_id;
use corelib::shutdown::Shutdown;
use corelib::types::event::EventKind;
use corelib::types::instance::WorkflowInstance;
use tokio::time::interval;

use crate::state_manager::StateManager;

pub struct TriggerManager {
    workflow_store: Arc<dyn WorkflowStore>,
    state_manager: Arc<StateManager>,
    running: AtomicBool,
}

impl TriggerManager {
    pub fn new(workflow_store: Arc<dyn WorkflowStore>, state_manager: Arc<StateManager>) -> Self {
        Self { workflow_store, state_manager, running: AtomicBool::new(false) }
    }

    pub async fn run(self: Arc<Self>, tick_interval: Duration, mut shutdown: Shutdown) {
        let mut ticker = interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.running.swap(true, Ordering::AcqRel) {
                        tracing::warn!("trigger manager tick skipped: previous pass still running");
                        continue;
                    }
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.sweep().await;
                        this.running.store(false, Ordering::Release);
                    });
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    async fn sweep(&self) {
        let now = Utc::now();
        let due = match self.workflow_store.list_due_for_trigger(now).await {
            | Ok(due) => due,
            | Err(err) => {
                tracing::warn!(%err, "trigger manager could not list due workflows");
                return;
            }
        };

        for (workflow, next_natural_trigger) in due {
            if !workflow.is_runnable() {
                continue;
            }

            let advanced = workflow.schedule.next(next_natural_trigger);
            if let Err(err) = self
                .workflow_store
                .advance_next_natural_trigger(&workflow.id, next_natural_trigger, advanced)
                .await
            {
                // Another tick (or a replica) already advanced this
                // workflow; skip rather than double-trigger it.
                tracing::debug!(%err, workflow_id = %workflow.id, "natural trigger race lost, skipping");
                continue;
            }

            let parameter = workflow.schedule.param(next_natural_trigger);
            let instance = WorkflowInstance::new(workflow.id.clone(), parameter);
            let trigger_id = generate_natural_trigger_id();

            if let Err(err) = self
                .state_manager
                .receive(
                    instance.clone(),
                    EventKind::TriggerExecution { trigger_id, trigger_parameters: serde_json::json!({}) },
                )
                .await
            {
                tracing::warn!(%err, %instance, "trigger manager failed to deliver natural trigger");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use corelib::database::event_store::{EventStore, SqlEventStore};
    use corelib::database::workflow_store::SqlWorkflowStore;
    use corelib::database::Database;
    use corelib::types::workflow::{Configuration, Workflow, WorkflowId};
    use corelib::schedule::Schedule;

    use super::*;

    fn runnable_workflow() -> Workflow {
        Workflow {
            id: WorkflowId::new("demo", "wf-1"),
            schedule: Schedule::Days,
            configuration: Configuration {
                docker_image: Some("repo/image:latest".to_string()),
                ..Default::default()
            },
            enabled: true,
        }
    }

    #[tokio::test]
    async fn due_workflow_is_triggered_and_cursor_advances() {
        let db = Database::in_memory().await.unwrap();
        let workflow_store: Arc<dyn WorkflowStore> = Arc::new(SqlWorkflowStore::new(db.clone()));
        let event_store: Arc<dyn EventStore> = Arc::new(SqlEventStore::new(db));
        let state_manager = StateManager::new(2, event_store.clone(), vec![]);
        state_manager.open();

        let past = Utc::now() - chrono::Duration::hours(1);
        workflow_store.upsert(&runnable_workflow(), past).await.unwrap();

        let manager = TriggerManager::new(workflow_store.clone(), state_manager.clone());
        manager.sweep().await;

        let (_, next) = workflow_store
            .list_due_for_trigger(Utc::now() + chrono::Duration::days(2))
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        assert!(next > past);

        let active = state_manager.active_states().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].state, corelib::types::run_state::State::Queued);
    }

    #[tokio::test]
    async fn unconfigured_workflow_is_skipped() {
        let db = Database::in_memory().await.unwrap();
        let workflow_store: Arc<dyn WorkflowStore> = Arc::new(SqlWorkflowStore::new(db.clone()));
        let event_store: Arc<dyn EventStore> = Arc::new(SqlEventStore::new(db));
        let state_manager = StateManager::new(2, event_store.clone(), vec![]);
        state_manager.open();

        let mut workflow = runnable_workflow();
        workflow.configuration.docker_image = None;
        let past = Utc::now() - chrono::Duration::hours(1);
        workflow_store.upsert(&workflow, past).await.unwrap();

        let manager = TriggerManager::new(workflow_store, state_manager.clone());
        manager.sweep().await;

        assert!(state_manager.active_states().await.is_empty());
    }
}
