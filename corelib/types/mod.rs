pub mod backfill;
pub mod event;
pub mod instance;
pub mod run_state;
pub mod workflow;

pub use backfill::Backfill;
pub use event::{Event, EventKind};
pub use instance::WorkflowInstance;
pub use run_state::{RunState, State, StateData};
pub use workflow::{Configuration, Schedule, Workflow, WorkflowId};
