//! Scheduler Tick (C6): a non-overlapping periodic sweep over the active
//! index, timing out instances that have sat in one state past its
//! configured TTL (spec.md §4.6). Grounded on the teacher's dispatcher tick
//! loop shape — `tokio::select!` between an interval and a shutdown signal,
//! with an `AtomicBool` guard so a slow pass never overlaps the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use corelib::database::event_store::EventStore;
use corelib::shutdown::Shutdown;
use corelib::types::event::EventKind;
use tokio::time::interval;

use crate::replayer::Replayer;
use crate::state_manager::StateManager;

/// Looks up the TTL for a state's `as_config_key()` string. A trait rather
/// than taking `corelib::config::SchedulerConfig` directly so tests can
/// supply a fixed map without building a full `Config`.
pub trait StateTtls: Send + Sync {
    fn ttl_for_state(&self, state: &str) -> Duration;
}

impl StateTtls for corelib::config::SchedulerConfig {
    fn ttl_for_state(&self, state: &str) -> Duration {
        corelib::config::SchedulerConfig::ttl_for_state(self, state)
    }
}

pub struct SchedulerTick {
    event_store: Arc<dyn EventStore>,
    state_manager: Arc<StateManager>,
    ttls: Arc<dyn StateTtls>,
    running: AtomicBool,
}

impl SchedulerTick {
    pub fn new(
        event_store: Arc<dyn EventStore>,
        state_manager: Arc<StateManager>,
        ttls: Arc<dyn StateTtls>,
    ) -> Self {
        Self { event_store, state_manager, ttls, running: AtomicBool::new(false) }
    }

    pub async fn run(self: Arc<Self>, tick_interval: Duration, mut shutdown: Shutdown) {
        let mut ticker = interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.running.swap(true, Ordering::AcqRel) {
                        tracing::warn!("scheduler tick skipped: previous pass still running");
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

    /// One pass: replays every active instance, times out whichever has
    /// exceeded its current state's TTL. Each instance's replay/timeout is
    /// isolated so one corrupt log can't abort the sweep.
    async fn sweep(&self) {
        let index = match self.event_store.index_read().await {
            | Ok(index) => index,
            | Err(err) => {
                tracing::warn!(%err, "scheduler tick could not read the active index");
                return;
            }
        };

        let replayer = Replayer::new(self.event_store.as_ref());
        let now = Utc::now();

        for instance in index.keys() {
            let run_state = match replayer.replay(instance).await {
                | Ok(state) => state,
                | Err(err) => {
                    tracing::warn!(%err, %instance, "scheduler tick could not replay instance");
                    continue;
                }
            };

            if run_state.is_terminal() {
                continue;
            }

            let ttl = self.ttls.ttl_for_state(run_state.state.as_config_key());
            let age = (now - run_state.timestamp)
                .to_std()
                .unwrap_or(Duration::ZERO);

            if age >= ttl {
                if let Err(err) =
                    self.state_manager.receive(instance.clone(), EventKind::Timeout).await
                {
                    tracing::warn!(%err, %instance, "scheduler tick failed to timeout a stale instance");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use corelib::database::Database;
    use corelib::database::event_store::SqlEventStore;
    use corelib::types::instance::WorkflowInstance;
    use corelib::types::workflow::WorkflowId;

    use super::*;

    struct FixedTtl(Duration);
    impl StateTtls for FixedTtl {
        fn ttl_for_state(&self, _state: &str) -> Duration {
            self.0
        }
    }

    #[tokio::test]
    async fn stale_queued_instance_is_timed_out() {
        let db = Database::in_memory().await.unwrap();
        let event_store: Arc<dyn EventStore> = Arc::new(SqlEventStore::new(db));
        let state_manager = StateManager::new(2, event_store.clone(), vec![]);
        state_manager.open();

        let instance = WorkflowInstance::new(WorkflowId::new("demo", "wf-1"), "2020-01-01");
        state_manager
            .receive(
                instance.clone(),
                EventKind::TriggerExecution {
                    trigger_id: "natural-1".to_string(),
                    trigger_parameters: serde_json::json!({}),
                },
            )
            .await
            .unwrap();

        let tick = SchedulerTick::new(
            event_store.clone(),
            state_manager.clone(),
            Arc::new(FixedTtl(Duration::ZERO)),
        );
        tick.sweep().await;

        let replayer = Replayer::new(event_store.as_ref());
        let state = replayer.replay(&instance).await.unwrap();
        assert_eq!(state.state, corelib::types::run_state::State::Failed);
    }

    #[tokio::test]
    async fn fresh_instance_is_left_alone() {
        let db = Database::in_memory().await.unwrap();
        let event_store: Arc<dyn EventStore> = Arc::new(SqlEventStore::new(db));
        let state_manager = StateManager::new(2, event_store.clone(), vec![]);
        state_manager.open();

        let instance = WorkflowInstance::new(WorkflowId::new("demo", "wf-1"), "2020-01-01");
        state_manager
            .receive(
                instance.clone(),
                EventKind::TriggerExecution {
                    trigger_id: "natural-1".to_string(),
                    trigger_parameters: serde_json::json!({}),
                },
            )
            .await
            .unwrap();

        let tick = SchedulerTick::new(
            event_store.clone(),
            state_manager.clone(),
            Arc::new(FixedTtl(Duration::from_secs(3600))),
        );
        tick.sweep().await;

        let replayer = Replayer::new(event_store.as_ref());
        let state = replayer.replay(&instance).await.unwrap();
        assert_eq!(state.state, corelib::types::run_state::State::Queued);
    }
}
