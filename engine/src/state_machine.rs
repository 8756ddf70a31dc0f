//! RunState machine (C3): the pure `(State, StateData, Event) -> (State,
//! StateData)` function spec.md §4.3 describes. No I/O, no clock reads
//! beyond the timestamp the caller supplies — fully unit-testable, in the
//! style of the teacher's `dispatcher/retry.rs` pure-computation modules.

use corelib::types::event::EventKind;
use corelib::types::run_state::{RunState, State};

use crate::error::EngineError;

/// Applies `event` to `run_state`, returning the new `RunState` with its
/// counter advanced, or `IllegalTransition` if `event` isn't legal from the
/// current state.
pub fn apply(
    run_state: &RunState,
    event: EventKind,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<RunState, EngineError> {
    if run_state.state.is_terminal() {
        return Err(EngineError::IllegalTransition(format!(
            "{} is terminal, rejecting {}",
            run_state.state,
            event.name()
        )));
    }

    let mut data = run_state.data.clone();

    // `info` and (outside PREPARE/SUBMITTING/RUNNING specifics) `halt`/
    // `timeout` apply uniformly across any non-terminal state.
    let new_state = match (run_state.state, event.clone()) {
        | (_, EventKind::Info { message }) => {
            data.push_message(message);
            run_state.state
        }
        | (_, EventKind::Halt) => State::Done,
        | (_, EventKind::Timeout) => State::Failed,

        | (State::New, EventKind::TriggerExecution { trigger_id, trigger_parameters }) => {
            data.trigger_id = Some(trigger_id);
            data.trigger_parameters = Some(trigger_parameters);
            State::Queued
        }
        | (State::Queued, EventKind::Dequeue) => State::Prepare,
        | (State::Prepare, EventKind::Submit { execution_description }) => {
            data.execution_description = Some(execution_description);
            State::Submitting
        }
        | (State::Submitting, EventKind::Submitted { execution_id }) => {
            data.execution_id = Some(execution_id.into());
            State::Submitted
        }
        | (State::Submitting, EventKind::RunError { message }) => {
            data.push_message(message);
            State::Failed
        }
        | (State::Submitted, EventKind::Started) => State::Running,
        | (State::Running, EventKind::Terminate { exit_code, success }) => {
            data.last_exit = Some(exit_code);
            if success {
                State::Done
            } else {
                State::Terminated
            }
        }
        | (State::Terminated, EventKind::RetryAfter { delay_ms })
        | (State::Failed, EventKind::RetryAfter { delay_ms }) => {
            data.retry_delay_millis = Some(delay_ms);
            State::AwaitingRetry
        }
        | (State::Terminated | State::Failed, EventKind::RunError { message }) => {
            data.push_message(message);
            State::Failed
        }
        | (State::AwaitingRetry, EventKind::Retry) => {
            data.retry_cost += 1;
            State::Queued
        }

        | (state, event) => {
            return Err(EngineError::IllegalTransition(format!(
                "{state} does not accept {}",
                event.name()
            )));
        }
    };

    Ok(RunState {
        instance: run_state.instance.clone(),
        state: new_state,
        data,
        timestamp: now,
        counter: run_state.counter + 1,
    })
}

/// Folds `events` over the `NEW` base state, in counter order — the
/// replayer (C2) and the idempotent-replay invariant both go through this.
pub fn fold(
    instance: corelib::types::instance::WorkflowInstance,
    base_timestamp: chrono::DateTime<chrono::Utc>,
    events: impl IntoIterator<Item = (EventKind, chrono::DateTime<chrono::Utc>)>,
) -> Result<RunState, EngineError> {
    let mut state = RunState::new_base(instance, base_timestamp);
    for (event, at) in events {
        state = apply(&state, event, at)?;
    }
    Ok(state)
}
