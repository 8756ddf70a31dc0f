//! Output handlers (C5): ordered reactions to a state transition. Each
//! handler's failure is isolated — logged and metered, never reversing the
//! already-durable transition (spec.md §4.5, §7).

mod docker_runner;
mod execution_description;
mod monitoring;
mod publisher;
mod termination;
mod transition_logger;

pub use docker_runner::DockerRunnerHandler;
pub use execution_description::ExecutionDescriptionHandler;
pub use monitoring::MonitoringHandler;
pub use publisher::{DomainEventPublisher, LoggingPublisher, PublisherHandler};
pub use termination::TerminationHandler;
pub use transition_logger::TransitionLogger;

use std::sync::Arc;

use async_trait::async_trait;
use corelib::types::event::EventKind;
use corelib::types::instance::WorkflowInstance;
use corelib::types::run_state::RunState;

/// The handlers' only way back into the state manager (C4): emitting a
/// follow-up event for the instance they just observed a transition for.
/// Handed to handlers as an owned `Arc` rather than a borrow so a handler
/// that needs to watch a long-running execution (C9's `DockerRunnerHandler`)
/// can move it into a detached task instead of blocking the dispatch loop.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, instance: WorkflowInstance, kind: EventKind);
}

#[async_trait]
pub trait OutputHandler: Send + Sync {
    async fn transition_into(&self, run_state: &RunState, sink: Arc<dyn EventSink>);
}

/// Dispatches `run_state` through every handler in order, on the caller's
/// executor — the state manager (C4) is responsible for running this on a
/// separate executor from its shards so handler latency can't stall one.
pub async fn dispatch(handlers: &[Box<dyn OutputHandler>], run_state: &RunState, sink: Arc<dyn EventSink>) {
    for handler in handlers {
        handler.transition_into(run_state, sink.clone()).await;
    }
}
