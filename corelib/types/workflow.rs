//! Workflow registration: the schedule and container configuration a
//! natural trigger or backfill ultimately runs against.

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use crate::schedule::Schedule;
use crate::validation::{validate_image_reference, validate_schedule};

/// spec.md §3: `WorkflowId = (component: string, name: string)`. `component`
/// groups workflows owned by the same producing system (the §6 list/get
/// filter); `name` identifies one within it.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId {
    pub component: String,
    pub name: String,
}

impl WorkflowId {
    pub fn new(component: impl Into<String>, name: impl Into<String>) -> Self {
        Self { component: component.into(), name: name.into() }
    }

    /// Parses the `"component/name"` form `Display` produces — the shape
    /// the single `TEXT` `workflow_id` columns persist, since the storage
    /// schema predates this two-part id.
    pub fn parse(value: &str) -> Option<Self> {
        let (component, name) = value.split_once('/')?;
        Some(Self::new(component, name))
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.component, self.name)
    }
}

/// Container execution configuration. A workflow is "configured" iff
/// `docker_image` is present — an unconfigured workflow can be registered
/// (its schedule starts producing natural triggers) but the Trigger Manager
/// (C7) skips it until configuration lands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Configuration {
    #[validate(custom = "validate_image_reference")]
    pub docker_image: Option<String>,
    pub resource_requirements: ResourceRequirements,
    pub command: Vec<String>,
    /// Exit codes the runner treats as success. Empty means "exit 0 only".
    #[serde(default)]
    pub success_exit_codes: Vec<i32>,
}

impl Configuration {
    pub fn is_configured(&self) -> bool {
        self.docker_image.is_some()
    }

    /// spec.md §4.3's RUNNING -> terminate(exit) rule: exit 0, or a member of
    /// the configured success set, is success.
    pub fn is_success_exit(&self, exit_code: i32) -> bool {
        exit_code == 0 || self.success_exit_codes.contains(&exit_code)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_millicores: Option<u32>,
    pub memory_mb: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Workflow {
    pub id: WorkflowId,
    #[validate(custom = "validate_schedule")]
    pub schedule: Schedule,
    #[validate]
    pub configuration: Configuration,
    pub enabled: bool,
}

impl Workflow {
    pub fn is_runnable(&self) -> bool {
        self.enabled && self.configuration.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_workflow_is_not_runnable() {
        let workflow = Workflow {
            id: WorkflowId::new("demo", "wf-1"),
            schedule: Schedule::Days,
            configuration: Configuration::default(),
            enabled: true,
        };
        assert!(!workflow.is_runnable());
    }

    #[test]
    fn disabled_configured_workflow_is_not_runnable() {
        let workflow = Workflow {
            id: WorkflowId::new("demo", "wf-1"),
            schedule: Schedule::Days,
            configuration: Configuration {
                docker_image: Some("repo/image:latest".to_string()),
                ..Default::default()
            },
            enabled: false,
        };
        assert!(!workflow.is_runnable());
    }

    #[test]
    fn zero_exit_is_always_success() {
        let configuration = Configuration::default();
        assert!(configuration.is_success_exit(0));
        assert!(!configuration.is_success_exit(1));
    }

    #[test]
    fn configured_success_set_extends_zero() {
        let configuration = Configuration { success_exit_codes: vec![75], ..Default::default() };
        assert!(configuration.is_success_exit(0));
        assert!(configuration.is_success_exit(75));
        assert!(!configuration.is_success_exit(1));
    }

    #[test]
    fn enabled_configured_workflow_is_runnable() {
        let workflow = Workflow {
            id: WorkflowId::new("demo", "wf-1"),
            schedule: Schedule::Days,
            configuration: Configuration {
                docker_image: Some("repo/image:latest".to_string()),
                ..Default::default()
            },
            enabled: true,
        };
        assert!(workflow.is_runnable());
    }
}
