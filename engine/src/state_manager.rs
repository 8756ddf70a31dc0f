//! State Manager (C4): serializes events per [`WorkflowInstance`] across a
//! fixed set of single-threaded shards, hashing instance keys to shards so
//! distinct instances make progress in parallel (spec.md §4.4).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use corelib::database::event_store::EventStore;
use corelib::types::event::{Event, EventKind};
use corelib::types::instance::WorkflowInstance;
use corelib::types::run_state::RunState;
use tokio::sync::{mpsc, oneshot};

use crate::error::EngineError;
use crate::handlers::{self, EventSink, OutputHandler};
use crate::replayer::Replayer;
use crate::state_machine;

enum ShardMessage {
    Receive { event: EventKind, respond: oneshot::Sender<Result<RunState, EngineError>> },
    Snapshot { respond: oneshot::Sender<Vec<RunState>> },
    Restore { states: Vec<RunState>, respond: oneshot::Sender<Result<(), EngineError>> },
}

struct Shard {
    sender: mpsc::Sender<(WorkflowInstance, ShardMessage)>,
}

pub struct StateManager {
    shards: Vec<Shard>,
    open: AtomicBool,
}

impl StateManager {
    pub fn new(
        shard_count: usize,
        event_store: Arc<dyn EventStore>,
        handlers: Vec<Box<dyn OutputHandler>>,
    ) -> Arc<Self> {
        let handlers = Arc::new(handlers);
        let mut shards = Vec::with_capacity(shard_count);

        Arc::new_cyclic(|weak: &std::sync::Weak<StateManager>| {
            for _ in 0..shard_count {
                let (tx, rx) = mpsc::channel(1024);
                shards.push(Shard { sender: tx });
                tokio::spawn(run_shard(rx, event_store.clone(), handlers.clone(), weak.clone()));
            }
            StateManager { shards, open: AtomicBool::new(false) }
        })
    }

    fn shard_for(&self, instance: &WorkflowInstance) -> &Shard {
        let mut hasher = DefaultHasher::new();
        instance.shard_key().hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    pub async fn receive(
        &self,
        instance: WorkflowInstance,
        event: EventKind,
    ) -> Result<RunState, EngineError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(EngineError::IsClosed);
        }
        let (respond, rx) = oneshot::channel();
        self.shard_for(&instance)
            .sender
            .send((instance, ShardMessage::Receive { event, respond }))
            .await
            .map_err(|_| EngineError::IsClosed)?;
        rx.await.map_err(|_| EngineError::IsClosed)?
    }

    /// Only permitted before the manager opens; rejects with `IsClosed`
    /// afterward (spec.md §4.4).
    pub async fn restore(&self, states: Vec<RunState>) -> Result<(), EngineError> {
        if self.open.load(Ordering::Acquire) {
            return Err(EngineError::IsClosed);
        }
        let mut by_shard: HashMap<usize, Vec<RunState>> = HashMap::new();
        for state in states {
            let mut hasher = DefaultHasher::new();
            state.instance.shard_key().hash(&mut hasher);
            let index = (hasher.finish() as usize) % self.shards.len();
            by_shard.entry(index).or_default().push(state);
        }
        for (index, states) in by_shard {
            let (respond, rx) = oneshot::channel();
            let instance = states[0].instance.clone();
            self.shards[index]
                .sender
                .send((instance, ShardMessage::Restore { states, respond }))
                .await
                .map_err(|_| EngineError::IsClosed)?;
            rx.await.map_err(|_| EngineError::IsClosed)??;
        }
        Ok(())
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub async fn active_states(&self) -> Vec<RunState> {
        let mut all = Vec::new();
        for shard in &self.shards {
            let (respond, rx) = oneshot::channel();
            // A dummy instance key — `Snapshot` ignores it; every shard
            // owns a distinct channel so this never crosses shards.
            let dummy = WorkflowInstance::new(
                corelib::types::workflow::WorkflowId::new("", ""),
                "",
            );
            if shard.sender.send((dummy, ShardMessage::Snapshot { respond })).await.is_ok() {
                if let Ok(states) = rx.await {
                    all.extend(states);
                }
            }
        }
        all
    }

    /// Drains queued work with a bounded grace period, then stops accepting
    /// new events.
    pub async fn close(&self, grace: std::time::Duration) {
        self.open.store(false, Ordering::Release);
        tokio::time::sleep(grace).await;
    }
}

#[async_trait]
impl EventSink for StateManager {
    async fn emit(&self, instance: WorkflowInstance, kind: EventKind) {
        if let Err(err) = self.receive(instance.clone(), kind).await {
            tracing::warn!(%err, %instance, "failed to emit follow-up event");
        }
    }
}

async fn run_shard(
    mut rx: mpsc::Receiver<(WorkflowInstance, ShardMessage)>,
    event_store: Arc<dyn EventStore>,
    handlers: Arc<Vec<Box<dyn OutputHandler>>>,
    manager: std::sync::Weak<StateManager>,
) {
    let mut states: HashMap<WorkflowInstance, RunState> = HashMap::new();
    let replayer_store = event_store.clone();

    while let Some((instance, message)) = rx.recv().await {
        match message {
            | ShardMessage::Receive { event, respond } => {
                let result = handle_receive(
                    &instance,
                    event,
                    &mut states,
                    replayer_store.as_ref(),
                )
                .await;

                if let Ok(new_state) = &result {
                    let handlers = handlers.clone();
                    let new_state = new_state.clone();
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        if let Some(manager) = manager.upgrade() {
                            let sink: Arc<dyn handlers::EventSink> = manager;
                            handlers::dispatch(&handlers, &new_state, sink).await;
                        }
                    });
                }
                let _ = respond.send(result);
            }
            | ShardMessage::Snapshot { respond } => {
                let snapshot: Vec<RunState> =
                    states.values().filter(|s| !s.is_terminal()).cloned().collect();
                let _ = respond.send(snapshot);
            }
            | ShardMessage::Restore { states: restored, respond } => {
                for state in restored {
                    states.insert(state.instance.clone(), state);
                }
                let _ = respond.send(Ok(()));
            }
        }
    }
}

async fn handle_receive(
    instance: &WorkflowInstance,
    event: EventKind,
    states: &mut HashMap<WorkflowInstance, RunState>,
    event_store: &dyn EventStore,
) -> Result<RunState, EngineError> {
    let current = states
        .get(instance)
        .cloned()
        .unwrap_or_else(|| RunState::new_base(instance.clone(), chrono::Utc::now()));

    let attempt = apply_and_persist(instance, &current, event.clone(), event_store).await;

    let new_state = match attempt {
        | Ok(state) => state,
        | Err(EngineError::StorageUnavailable(corelib::database::StorageError::Conflict {
            ..
        })) => {
            // Reload via replay and retry exactly once (spec.md §4.4 step iv).
            let replayer = Replayer::new(event_store);
            let reloaded = replayer.replay(instance).await?;
            apply_and_persist(instance, &reloaded, event, event_store).await?
        }
        | Err(err) => return Err(err),
    };

    if new_state.is_terminal() {
        event_store.index_remove(instance).await.ok();
        states.remove(instance);
    } else {
        states.insert(instance.clone(), new_state.clone());
    }
    Ok(new_state)
}

async fn apply_and_persist(
    instance: &WorkflowInstance,
    current: &RunState,
    event: EventKind,
    event_store: &dyn EventStore,
) -> Result<RunState, EngineError> {
    let now = chrono::Utc::now();
    let trigger_id =
        if let EventKind::TriggerExecution { trigger_id, .. } = &event { Some(trigger_id.clone()) } else { None };
    let new_state = state_machine::apply(current, event.clone(), now)?;

    event_store
        .append(
            instance,
            Event::new(new_state.counter, event, now),
            current.counter,
            trigger_id.or_else(|| current.data.trigger_id.clone()),
        )
        .await
        .map_err(EngineError::StorageUnavailable)?;

    Ok(new_state)
}

#[cfg(test)]
mod tests {
    use corelib::database::event_store::SqlEventStore;
    use corelib::database::Database;
    use corelib::types::workflow::WorkflowId;

    use super::*;

    async fn manager() -> (Arc<StateManager>, Arc<dyn EventStore>) {
        let db = Database::in_memory().await.unwrap();
        let event_store: Arc<dyn EventStore> = Arc::new(SqlEventStore::new(db));
        let manager = StateManager::new(4, event_store.clone(), vec![]);
        manager.open();
        (manager, event_store)
    }

    #[tokio::test]
    async fn receive_applies_sequential_events() {
        let (manager, _store) = manager().await;
        let instance = WorkflowInstance::new(WorkflowId::new("demo", "wf-1"), "2020-01-01");

        let queued = manager
            .receive(
                instance.clone(),
                EventKind::TriggerExecution {
                    trigger_id: "natural-1".to_string(),
                    trigger_parameters: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        assert_eq!(queued.state, corelib::types::run_state::State::Queued);

        let prepared = manager.receive(instance.clone(), EventKind::Dequeue).await.unwrap();
        assert_eq!(prepared.state, corelib::types::run_state::State::Prepare);
    }

    #[tokio::test]
    async fn active_states_excludes_terminal_instances() {
        let (manager, _store) = manager().await;
        let instance = WorkflowInstance::new(WorkflowId::new("demo", "wf-1"), "2020-01-01");
        manager
            .receive(
                instance.clone(),
                EventKind::TriggerExecution {
                    trigger_id: "natural-1".to_string(),
                    trigger_parameters: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        manager.receive(instance.clone(), EventKind::Halt).await.unwrap();

        let active = manager.active_states().await;
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn receive_rejects_once_closed() {
        let (manager, _store) = manager().await;
        manager.close(std::time::Duration::from_millis(1)).await;
        let instance = WorkflowInstance::new(WorkflowId::new("demo", "wf-1"), "2020-01-01");
        let err = manager.receive(instance, EventKind::Dequeue).await.unwrap_err();
        assert!(matches!(err, EngineError::IsClosed));
    }
}
