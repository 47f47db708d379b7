use crate::{EventEmitter, ExecutionId, TaskError};
use async_trait::async_trait;
use plancore::{Task, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// External collaborator that performs the work of one task
///
/// The executor calls `run` once per attempt; with a retry policy a task may
/// be attempted several times.
#[async_trait]
pub trait TaskRunner<P>: Send + Sync {
    async fn run(&self, ctx: TaskContext<P>) -> Result<TaskOutput, TaskError>;
}

/// Execution context passed to the runner for each attempt
#[derive(Clone)]
pub struct TaskContext<P> {
    pub execution_id: ExecutionId,

    pub task: Task<P>,

    /// Zero-based level the task was planned into
    pub level: usize,

    /// One-based attempt number
    pub attempt: u32,

    /// Outputs of the task's direct dependencies, keyed by task id
    pub inputs: HashMap<TaskId, serde_json::Value>,

    pub events: EventEmitter,

    pub cancellation: CancellationToken,
}

impl<P> TaskContext<P> {
    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn payload(&self) -> &P {
        &self.task.payload
    }

    /// Output of a dependency or an error naming the missing input
    pub fn require_input(&self, task_id: &str) -> Result<&serde_json::Value, TaskError> {
        self.inputs
            .get(task_id)
            .ok_or_else(|| TaskError::Failed(format!("Missing output of dependency: {}", task_id)))
    }
}

/// Output of a successful task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub value: serde_json::Value,
}

impl TaskOutput {
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}
