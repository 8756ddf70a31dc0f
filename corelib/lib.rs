//! Shared types, storage contracts, and ambient utilities for the workflow
//! scheduler core — the counterpart to the teacher's `lib` crate.

pub mod config;
pub mod database;
mod ids;
pub mod model;
pub mod netutils;
pub mod schedule;
pub mod shutdown;
pub mod timeutil;
pub mod types;
pub mod validation;

pub use ids::{generate_natural_trigger_id, BackfillId, ExecutionId, TriggerId};

pub mod prelude {
    pub use crate::model::ModelId;
    pub use crate::shutdown::Shutdown;
    pub use crate::types::{
        Backfill, Configuration, Event, EventKind, RunState, Schedule, State, StateData, Workflow,
        WorkflowId, WorkflowInstance,
    };
}
