use crate::{TaskError, WorkflowId};
use chrono::{DateTime, Utc};
use plancore::TaskId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted while a plan executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        levels: usize,
        tasks: usize,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    LevelStarted {
        execution_id: ExecutionId,
        level: usize,
        task_ids: Vec<TaskId>,
        timestamp: DateTime<Utc>,
    },
    LevelCompleted {
        execution_id: ExecutionId,
        level: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        execution_id: ExecutionId,
        task_id: TaskId,
        level: usize,
        timestamp: DateTime<Utc>,
    },
    TaskRetrying {
        execution_id: ExecutionId,
        task_id: TaskId,
        attempt: u32,
        error: String,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        execution_id: ExecutionId,
        task_id: TaskId,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        execution_id: ExecutionId,
        task_id: TaskId,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    TaskSkipped {
        execution_id: ExecutionId,
        task_id: TaskId,
        blocked_by: TaskId,
        timestamp: DateTime<Utc>,
    },
    TaskEvent {
        execution_id: ExecutionId,
        task_id: TaskId,
        event: TaskEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events a runner reports from inside a task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum TaskEvent {
    Info { message: String },
}

/// Event emitter handed to runners for real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    task_id: TaskId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        task_id: TaskId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            task_id,
            sender,
        }
    }

    pub fn emit(&self, event: TaskEvent) {
        let _ = self.sender.send(ExecutionEvent::TaskEvent {
            execution_id: self.execution_id,
            task_id: self.task_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(TaskEvent::Info {
            message: message.into(),
        });
    }

    /// Runner is about to be invoked for the first time
    pub(crate) fn started(&self, level: usize) {
        let _ = self.sender.send(ExecutionEvent::TaskStarted {
            execution_id: self.execution_id,
            task_id: self.task_id.clone(),
            level,
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn retrying(&self, attempt: u32, error: &TaskError, delay_ms: u64) {
        let _ = self.sender.send(ExecutionEvent::TaskRetrying {
            execution_id: self.execution_id,
            task_id: self.task_id.clone(),
            attempt,
            error: error.to_string(),
            delay_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Broadcast bus for execution events; sending never fails without listeners
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, task_id: TaskId) -> EventEmitter {
        EventEmitter::new(execution_id, task_id, self.sender.clone())
    }
}
