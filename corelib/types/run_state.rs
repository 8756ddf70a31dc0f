//! `RunState`: the authoritative, in-memory-and-logged record of where a
//! [`super::instance::WorkflowInstance`] is in the state machine (C3).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::WorkflowInstance;
use crate::ids::{ExecutionId, TriggerId};

/// Caps the in-memory message history so a chatty handler can't grow a
/// `RunState` unboundedly across a long-lived instance.
const MAX_MESSAGE_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    New,
    Queued,
    Prepare,
    Submitting,
    Submitted,
    Running,
    Terminated,
    Failed,
    Error,
    AwaitingRetry,
    Done,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Error)
    }

    pub fn as_config_key(self) -> &'static str {
        match self {
            | State::New => "NEW",
            | State::Queued => "QUEUED",
            | State::Prepare => "PREPARE",
            | State::Submitting => "SUBMITTING",
            | State::Submitted => "SUBMITTED",
            | State::Running => "RUNNING",
            | State::Terminated => "TERMINATED",
            | State::Failed => "FAILED",
            | State::Error => "ERROR",
            | State::AwaitingRetry => "AWAITING_RETRY",
            | State::Done => "DONE",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_config_key())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateData {
    pub trigger_id: Option<TriggerId>,
    pub trigger_parameters: Option<serde_json::Value>,
    pub execution_id: Option<ExecutionId>,
    pub retry_cost: u32,
    pub last_exit: Option<i32>,
    pub message_history: VecDeque<String>,
    pub retry_delay_millis: Option<u64>,
    pub execution_description: Option<serde_json::Value>,
}

impl StateData {
    pub fn push_message(&mut self, message: impl Into<String>) {
        if self.message_history.len() >= MAX_MESSAGE_HISTORY {
            self.message_history.pop_front();
        }
        self.message_history.push_back(message.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub instance: WorkflowInstance,
    pub state: State,
    pub data: StateData,
    pub timestamp: DateTime<Utc>,
    pub counter: u64,
}

impl RunState {
    /// The base state every instance starts from before its first
    /// `triggerExecution` event is folded in by the replayer (C2).
    pub fn new_base(instance: WorkflowInstance, now: DateTime<Utc>) -> Self {
        Self {
            instance,
            state: State::New,
            data: StateData::default(),
            timestamp: now,
            counter: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_done_and_error() {
        assert!(State::Done.is_terminal());
        assert!(State::Error.is_terminal());
        assert!(!State::Running.is_terminal());
    }

    #[test]
    fn message_history_is_capped() {
        let mut data = StateData::default();
        for i in 0..(MAX_MESSAGE_HISTORY + 10) {
            data.push_message(format!("message {i}"));
        }
        assert_eq!(data.message_history.len(), MAX_MESSAGE_HISTORY);
        assert_eq!(data.message_history.front().unwrap(), "message 10");
    }
}
