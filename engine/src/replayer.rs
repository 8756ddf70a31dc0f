//! Replayer (C2): rebuilds a [`RunState`] from its event log. Used at boot
//! to repopulate the state manager's in-memory map, and by the backfill
//! status endpoint to report historical outcomes for instances that have
//! already left the active index.

use corelib::database::event_store::EventStore;
use corelib::types::instance::WorkflowInstance;
use corelib::types::run_state::RunState;

use crate::error::EngineError;
use crate::state_machine;

pub struct Replayer<'a> {
    event_store: &'a dyn EventStore,
}

impl<'a> Replayer<'a> {
    pub fn new(event_store: &'a dyn EventStore) -> Self {
        Self { event_store }
    }

    /// Deterministically folds `instance`'s event log into its current
    /// `RunState`, starting from the `NEW` base state.
    pub async fn replay(&self, instance: &WorkflowInstance) -> Result<RunState, EngineError> {
        let events = self.event_store.read_events(instance).await?;
        let base_timestamp = events.first().map(|e| e.recorded_at).unwrap_or_else(chrono::Utc::now);
        state_machine::fold(
            instance.clone(),
            base_timestamp,
            events.into_iter().map(|e| (e.kind, e.recorded_at)),
        )
    }

    /// Rebuilds the active-instance map at boot: reads the index from C1,
    /// then replays each entry's log (spec.md's "On startup, C2 reads the
    /// active-instance index from C1, replays each log...").
    pub async fn restore_active_states(&self) -> Result<Vec<RunState>, EngineError> {
        let index = self.event_store.index_read().await?;
        let mut states = Vec::with_capacity(index.len());
        for instance in index.keys() {
            states.push(self.replay(instance).await?);
        }
        Ok(states)
    }
}
