use plancore::{PlanError, TaskId, ValidationIssue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Invalid workflow: {}", join_issues(.0))]
    Invalid(Vec<ValidationIssue>),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        task: TaskId,
        #[source]
        source: TaskError,
    },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error returned by a single task attempt
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskError {
    #[error("Execution failed: {0}")]
    Failed(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskError::Cancelled)
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
