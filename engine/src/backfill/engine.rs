use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use corelib::database::backfill_store::BackfillStore;
use corelib::database::event_store::EventStore;
use corelib::database::workflow_store::WorkflowStore;
use corelib::schedule::Schedule;
use corelib::shutdown::Shutdown;
use corelib::types::backfill::{Backfill, BackfillInput, EditableBackfillInput};
use corelib::types::event::EventKind;
use corelib::types::instance::WorkflowInstance;
use corelib::types::workflow::WorkflowId;
use corelib::BackfillId;
use tokio::time::interval;
use validator::Validate;

use crate::error::EngineError;
use crate::replayer::Replayer;
use crate::state_manager::StateManager;

/// The aligned instants of `P = [start, end)` under `schedule`, ascending.
fn enumerate_partitions(schedule: &Schedule, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut instants = Vec::new();
    let mut cursor = schedule.first_aligned_at_or_after(start);
    while cursor < end {
        instants.push(cursor);
        cursor = schedule.next(cursor);
    }
    instants
}

/// One partition's reported outcome (spec.md §4.8.3): `WAITING` for
/// instants not yet triggered, `UNKNOWN` for a processed instant with no
/// event log, or the instance's current/last-known [`corelib::types::run_state::State`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PartitionStatus {
    pub parameter: String,
    pub status: String,
}

/// A backfill plus its per-partition progress (spec.md §4.8.3): `processed`
/// partitions first, then `waiting`, reversed end-to-end for reverse
/// backfills — plus how many are currently in flight under its trigger id.
#[derive(Debug, Clone)]
pub struct BackfillStatus {
    pub backfill: Backfill,
    pub in_flight: usize,
    pub partitions: Vec<PartitionStatus>,
}

pub struct BackfillEngine {
    backfill_store: Arc<dyn BackfillStore>,
    workflow_store: Arc<dyn WorkflowStore>,
    event_store: Arc<dyn EventStore>,
    state_manager: Arc<StateManager>,
    running: AtomicBool,
}

impl BackfillEngine {
    pub fn new(
        backfill_store: Arc<dyn BackfillStore>,
        workflow_store: Arc<dyn WorkflowStore>,
        event_store: Arc<dyn EventStore>,
        state_manager: Arc<StateManager>,
    ) -> Self {
        Self { backfill_store, workflow_store, event_store, state_manager, running: AtomicBool::new(false) }
    }

    /// Validates and persists a new backfill (spec.md §4.8.1). The cursor
    /// starts at the range's first aligned partition in the direction of
    /// travel; a range with no aligned partitions at all is rejected.
    pub async fn create(&self, input: BackfillInput) -> Result<Backfill, EngineError> {
        input.validate().map_err(|e| EngineError::ValidationError(e.to_string()))?;

        if input.end <= input.start {
            return Err(EngineError::ValidationError("end must be after start".to_string()));
        }
        if !input.schedule.is_aligned(input.start) {
            return Err(EngineError::ValidationError("start parameter not aligned with schedule".to_string()));
        }
        if !input.schedule.is_aligned(input.end) {
            return Err(EngineError::ValidationError("end parameter not aligned with schedule".to_string()));
        }
        if !input.allow_future {
            let now = Utc::now();
            if input.start > now || input.schedule.previous(input.end) > now {
                return Err(EngineError::ValidationError(
                    "end is in the future; set allow_future to permit this".to_string(),
                ));
            }
        }

        let workflow_id = WorkflowId::new(input.component.clone(), input.workflow_id.clone());
        self.workflow_store
            .get(&workflow_id)
            .await
            .map_err(EngineError::StorageUnavailable)?
            .ok_or_else(|| EngineError::NotFound(format!("workflow {workflow_id} not registered")))?;

        let active = self.event_store.index_read().await.map_err(EngineError::StorageUnavailable)?;
        let conflicting: Vec<String> = enumerate_partitions(&input.schedule, input.start, input.end)
            .into_iter()
            .map(|instant| input.schedule.param(instant))
            .filter(|parameter| active.contains_key(&WorkflowInstance::new(workflow_id.clone(), parameter.clone())))
            .collect();
        if !conflicting.is_empty() {
            return Err(EngineError::Conflict(format!(
                "workflow {workflow_id} already has active instances for: {}",
                conflicting.join(", ")
            )));
        }

        let next_trigger = if input.reverse {
            input.schedule.previous(input.schedule.first_aligned_at_or_after(input.end))
        } else {
            input.schedule.first_aligned_at_or_after(input.start)
        };

        let backfill = Backfill {
            id: BackfillId::generate(),
            workflow_id,
            start: input.start,
            end: input.end,
            schedule: input.schedule,
            concurrency: input.concurrency,
            next_trigger,
            description: input.description,
            reverse: input.reverse,
            all_triggered: false,
            halted: false,
            trigger_parameters: input.trigger_parameters,
            created_at: Utc::now(),
        };

        if backfill.cursor_exhausted() {
            return Err(EngineError::ValidationError(
                "range contains no aligned partitions in the given direction".to_string(),
            ));
        }

        self.backfill_store.create(&backfill).await.map_err(EngineError::StorageUnavailable)?;
        Ok(backfill)
    }

    pub async fn get(&self, id: &BackfillId) -> Result<Backfill, EngineError> {
        self.backfill_store
            .get(id)
            .await
            .map_err(EngineError::StorageUnavailable)?
            .ok_or_else(|| EngineError::NotFound(format!("backfill {} not found", id)))
    }

    pub async fn list(&self) -> Result<Vec<Backfill>, EngineError> {
        self.backfill_store.list().await.map_err(EngineError::StorageUnavailable)
    }

    /// spec.md §4.8.3: partitions `P` split into `processed` (strictly
    /// before `nextTrigger` forward, strictly after in reverse) and
    /// `waiting`, each processed instant resolved to its current or
    /// last-known state via replay (`UNKNOWN` if it never ran), output in
    /// processed-then-waiting order, reversed end-to-end for reverse
    /// backfills.
    pub async fn status(&self, id: &BackfillId) -> Result<BackfillStatus, EngineError> {
        let backfill = self.get(id).await?;
        let in_flight = self.in_flight(&backfill.id).await?;

        let mut instants = enumerate_partitions(&backfill.schedule, backfill.start, backfill.end);
        if backfill.reverse {
            instants.reverse();
        }

        let replayer = Replayer::new(self.event_store.as_ref());
        let mut processed = Vec::with_capacity(instants.len());
        let mut waiting = Vec::new();
        for instant in instants {
            let parameter = backfill.schedule.param(instant);
            let already_triggered = if backfill.reverse {
                instant > backfill.next_trigger
            } else {
                instant < backfill.next_trigger
            };
            if !already_triggered {
                waiting.push(PartitionStatus { parameter, status: "WAITING".to_string() });
                continue;
            }

            let instance = WorkflowInstance::new(backfill.workflow_id.clone(), parameter.clone());
            let run_state = replayer.replay(&instance).await?;
            let status = if run_state.counter == 0 { "UNKNOWN".to_string() } else { run_state.state.to_string() };
            processed.push(PartitionStatus { parameter, status });
        }
        processed.extend(waiting);

        Ok(BackfillStatus { backfill, in_flight, partitions: processed })
    }

    /// How many partitions of `id` currently have an active instance, without
    /// paying for a full [`BackfillEngine::get`] when the caller already has
    /// the [`Backfill`] record (e.g. from [`BackfillEngine::list`]).
    pub async fn in_flight(&self, id: &BackfillId) -> Result<usize, EngineError> {
        Ok(self
            .event_store
            .index_read_by_trigger_id(&id.to_string())
            .await
            .map_err(EngineError::StorageUnavailable)?
            .len())
    }

    /// spec.md §4.8.4: halting stops the advancement loop from triggering
    /// further partitions; already-triggered instances run to completion.
    pub async fn halt(&self, id: &BackfillId) -> Result<Backfill, EngineError> {
        self.backfill_store
            .read_then_update(id, Box::new(|b| b.halted = true))
            .await
            .map_err(EngineError::StorageUnavailable)
    }

    /// spec.md §6 `DELETE /backfills/{id}`: halts the advancement loop and
    /// best-effort halts every instance currently in flight under this
    /// backfill's trigger id. A handful of instances failing to halt is
    /// reported as a partial failure rather than undoing the halt flag.
    pub async fn halt_and_cancel(&self, id: &BackfillId) -> Result<(), EngineError> {
        let backfill = self.halt(id).await?;

        let active = self
            .event_store
            .index_read_by_trigger_id(&backfill.id.to_string())
            .await
            .map_err(EngineError::StorageUnavailable)?;

        let mut failures = 0usize;
        for instance in active.into_keys() {
            if let Err(err) = self.state_manager.receive(instance.clone(), EventKind::Halt).await {
                tracing::warn!(%err, %instance, "failed to halt in-flight backfill instance");
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(EngineError::RunnerError(format!(
                "{failures} in-flight instance(s) could not be halted"
            )));
        }
        Ok(())
    }

    pub async fn update(
        &self,
        id: &BackfillId,
        input: EditableBackfillInput,
    ) -> Result<Backfill, EngineError> {
        input.validate().map_err(|e| EngineError::ValidationError(e.to_string()))?;
        self.backfill_store
            .read_then_update(
                id,
                Box::new(move |b| {
                    if let Some(concurrency) = input.concurrency {
                        b.concurrency = concurrency;
                    }
                    if let Some(description) = input.description {
                        b.description = Some(description);
                    }
                }),
            )
            .await
            .map_err(EngineError::StorageUnavailable)
    }

    pub async fn run(self: Arc<Self>, tick_interval: Duration, mut shutdown: Shutdown) {
        let mut ticker = interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.running.swap(true, Ordering::AcqRel) {
                        tracing::warn!("backfill tick skipped: previous pass still running");
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
        let runnable = match self.backfill_store.list_runnable().await {
            | Ok(runnable) => runnable,
            | Err(err) => {
                tracing::warn!(%err, "backfill tick could not list runnable backfills");
                return;
            }
        };

        for backfill in runnable {
            self.advance_one(backfill).await;
        }
    }

    /// Tops a single backfill's in-flight count back up to its configured
    /// concurrency, advancing the cursor one partition per trigger. §4.8.2
    /// wants the trigger append and the cursor advance in one storage
    /// transaction so a crash between them can't duplicate a trigger; that
    /// would need a cross-store transaction the engine doesn't have, so
    /// instead each iteration re-derives `active` (instances already
    /// indexed under this backfill's trigger id) and skips the trigger —
    /// advancing only the cursor — when the current partition is already
    /// in it. A crash after the append but before the cursor moved is then
    /// self-healing: the next sweep sees the partition already active and
    /// just catches the cursor up, rather than re-triggering into
    /// `IllegalTransition` and stalling forever.
    async fn advance_one(&self, backfill: Backfill) {
        let mut active: HashMap<WorkflowInstance, u64> =
            match self.event_store.index_read_by_trigger_id(&backfill.id.to_string()).await {
                | Ok(map) => map,
                | Err(err) => {
                    tracing::warn!(%err, backfill_id = %backfill.id, "could not count in-flight backfill instances");
                    return;
                }
            };
        let mut room = backfill.concurrency.saturating_sub(active.len());

        while room > 0 {
            let current = match self.backfill_store.get(&backfill.id).await {
                | Ok(Some(current)) => current,
                | Ok(None) => return,
                | Err(err) => {
                    tracing::warn!(%err, backfill_id = %backfill.id, "could not reload backfill before advancing");
                    return;
                }
            };
            if !current.is_runnable() {
                return;
            }

            let parameter = current.schedule.param(current.next_trigger);
            let instance = WorkflowInstance::new(current.workflow_id.clone(), parameter);
            let already_active = active.contains_key(&instance);

            if !already_active {
                let trigger_parameters = current.trigger_parameters.clone().unwrap_or(serde_json::json!({}));
                if let Err(err) = self
                    .state_manager
                    .receive(
                        instance.clone(),
                        EventKind::TriggerExecution {
                            trigger_id: current.id.to_string(),
                            trigger_parameters,
                        },
                    )
                    .await
                {
                    tracing::warn!(%err, %instance, "backfill tick failed to deliver a trigger");
                    return;
                }
                active.insert(instance, 0);
            }

            let updated = match self
                .backfill_store
                .read_then_update(&backfill.id, Box::new(|b| b.advance_cursor()))
                .await
            {
                | Ok(updated) => updated,
                | Err(err) => {
                    tracing::warn!(%err, backfill_id = %backfill.id, "could not advance backfill cursor");
                    return;
                }
            };

            if !already_active {
                room -= 1;
            }
            if updated.all_triggered {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use corelib::database::backfill_store::SqlBackfillStore;
    use corelib::database::event_store::SqlEventStore;
    use corelib::database::workflow_store::SqlWorkflowStore;
    use corelib::database::Database;
    use corelib::schedule::Schedule;
    use corelib::types::workflow::{Configuration, Workflow};

    use super::*;

    async fn setup() -> (BackfillEngine, Arc<dyn WorkflowStore>) {
        let db = Database::in_memory().await.unwrap();
        let backfill_store: Arc<dyn BackfillStore> = Arc::new(SqlBackfillStore::new(db.clone()));
        let workflow_store: Arc<dyn WorkflowStore> = Arc::new(SqlWorkflowStore::new(db.clone()));
        let event_store: Arc<dyn EventStore> = Arc::new(SqlEventStore::new(db));
        let state_manager = StateManager::new(2, event_store.clone(), vec![]);
        state_manager.open();

        workflow_store
            .upsert(
                &Workflow {
                    id: WorkflowId::new("demo", "wf-1"),
                    schedule: Schedule::Days,
                    configuration: Configuration {
                        docker_image: Some("repo/image:latest".to_string()),
                        ..Default::default()
                    },
                    enabled: true,
                },
                Utc::now() + chrono::Duration::days(365),
            )
            .await
            .unwrap();

        (BackfillEngine::new(backfill_store, workflow_store.clone(), event_store, state_manager), workflow_store)
    }

    fn dt(s: &str) -> chrono::DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn input() -> BackfillInput {
        BackfillInput {
            component: "demo".to_string(),
            workflow_id: "wf-1".to_string(),
            start: dt("2020-01-01T00:00:00Z"),
            end: dt("2020-01-05T00:00:00Z"),
            schedule: Schedule::Days,
            concurrency: 2,
            description: None,
            reverse: false,
            allow_future: false,
            trigger_parameters: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_unregistered_workflow() {
        let (engine, _) = setup().await;
        let mut bad = input();
        bad.workflow_id = "ghost".to_string();
        let err = engine.create(bad).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_then_advance_respects_concurrency_cap() {
        let (engine, _) = setup().await;
        let backfill = engine.create(input()).await.unwrap();

        engine.advance_one(backfill.clone()).await;

        let status = engine.status(&backfill.id).await.unwrap();
        assert_eq!(status.in_flight, 2);
        assert!(!status.backfill.all_triggered);
        assert_eq!(status.partitions.len(), 4);
        let processed: Vec<_> = status.partitions.iter().filter(|p| p.status != "WAITING").collect();
        let waiting: Vec<_> = status.partitions.iter().filter(|p| p.status == "WAITING").collect();
        assert_eq!(processed.len(), 2);
        assert_eq!(waiting.len(), 2);
        assert!(processed.iter().all(|p| p.status == "QUEUED"));
    }

    #[tokio::test]
    async fn create_rejects_misaligned_start() {
        let (engine, _) = setup().await;
        let mut bad = input();
        bad.start = dt("2020-01-01T03:00:00Z");
        let err = engine.create(bad).await.unwrap_err();
        match err {
            | EngineError::ValidationError(msg) => assert!(msg.contains("not aligned")),
            | other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_rejects_future_range_without_allow_future() {
        let (engine, _) = setup().await;
        let mut future = input();
        let days = Schedule::Days;
        future.start = days.first_aligned_at_or_after(Utc::now() + chrono::Duration::days(1));
        future.end = days.next(days.next(future.start));
        let err = engine.create(future).await.unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
    }

    #[tokio::test]
    async fn create_allows_future_range_when_requested() {
        let (engine, _) = setup().await;
        let mut future = input();
        let days = Schedule::Days;
        future.start = days.first_aligned_at_or_after(Utc::now() + chrono::Duration::days(1));
        future.end = days.next(days.next(future.start));
        future.allow_future = true;
        engine.create(future).await.unwrap();
    }

    #[tokio::test]
    async fn halted_backfill_is_skipped_by_sweep() {
        let (engine, _) = setup().await;
        let backfill = engine.create(input()).await.unwrap();
        engine.halt(&backfill.id).await.unwrap();

        engine.advance_one(engine.get(&backfill.id).await.unwrap()).await;

        let status = engine.status(&backfill.id).await.unwrap();
        assert_eq!(status.in_flight, 0);
    }

    #[tokio::test]
    async fn update_changes_concurrency_and_description() {
        let (engine, _) = setup().await;
        let backfill = engine.create(input()).await.unwrap();

        let updated = engine
            .update(
                &backfill.id,
                EditableBackfillInput { concurrency: Some(5), description: Some("widened".to_string()) },
            )
            .await
            .unwrap();
        assert_eq!(updated.concurrency, 5);
        assert_eq!(updated.description.as_deref(), Some("widened"));
    }

    #[tokio::test]
    async fn create_rejects_overlap_with_already_active_instances() {
        let (engine, _) = setup().await;
        let backfill = engine.create(input()).await.unwrap();
        engine.advance_one(backfill).await; // drives 2020-01-01 and 2020-01-02 active

        let err = engine.create(input()).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_allows_disjoint_range_for_same_workflow() {
        let (engine, _) = setup().await;
        let backfill = engine.create(input()).await.unwrap();
        engine.advance_one(backfill).await;

        let mut disjoint = input();
        disjoint.start = dt("2020-02-01T00:00:00Z");
        disjoint.end = dt("2020-02-05T00:00:00Z");
        engine.create(disjoint).await.unwrap();
    }

    #[tokio::test]
    async fn halt_and_cancel_halts_in_flight_instances() {
        let (engine, _) = setup().await;
        let backfill = engine.create(input()).await.unwrap();
        engine.advance_one(backfill.clone()).await;
        assert_eq!(engine.status(&backfill.id).await.unwrap().in_flight, 2);

        engine.halt_and_cancel(&backfill.id).await.unwrap();

        let status = engine.status(&backfill.id).await.unwrap();
        assert!(status.backfill.halted);
        assert_eq!(status.in_flight, 0);
    }
}
