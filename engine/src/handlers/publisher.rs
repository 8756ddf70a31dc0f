use std::sync::Arc;

use async_trait::async_trait;
use corelib::types::run_state::{RunState, State};

use super::{EventSink, OutputHandler};

/// Emits domain events to an external pub/sub on `DONE`/`FAILED`. The
/// transport is out of scope (spec.md §1 treats storage/runner/pub-sub as
/// substitutable contracts); [`LoggingPublisher`] is the ambient default
/// until a real sink is wired in.
#[async_trait]
pub trait DomainEventPublisher: Send + Sync {
    async fn publish(&self, run_state: &RunState);
}

pub struct LoggingPublisher;

#[async_trait]
impl DomainEventPublisher for LoggingPublisher {
    async fn publish(&self, run_state: &RunState) {
        tracing::info!(
            instance = %run_state.instance,
            state = %run_state.state,
            "publishing domain event",
        );
    }
}

pub struct PublisherHandler {
    publisher: Box<dyn DomainEventPublisher>,
}

impl PublisherHandler {
    pub fn new(publisher: Box<dyn DomainEventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl OutputHandler for PublisherHandler {
    async fn transition_into(&self, run_state: &RunState, _sink: Arc<dyn EventSink>) {
        if matches!(run_state.state, State::Done | State::Failed) {
            self.publisher.publish(run_state).await;
        }
    }
}
