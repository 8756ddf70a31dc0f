//! A single scheduled occurrence of a workflow: the unit that flows through
//! the state machine (C3) and the state manager (C4).

use serde::{Deserialize, Serialize};

use super::workflow::WorkflowId;

#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_id: WorkflowId,
    /// The canonical textual rendering of a partition instant, e.g.
    /// `2017-01-02` for a `DAYS` schedule — see [`crate::schedule::Schedule::param`].
    pub parameter: String,
}

impl WorkflowInstance {
    pub fn new(workflow_id: WorkflowId, parameter: impl Into<String>) -> Self {
        Self { workflow_id, parameter: parameter.into() }
    }

    /// The key used to shard this instance across state-manager workers
    /// (spec.md §4.4) — workflow id and parameter together, since two
    /// instances are equal iff both match.
    pub fn shard_key(&self) -> String {
        format!("{}/{}", self.workflow_id, self.parameter)
    }
}

impl std::fmt::Display for WorkflowInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.parameter)
    }
}
