//! Plan execution runtime
//!
//! This crate consumes the levels produced by `plancore`: it runs each
//! level's tasks through a caller-supplied [`TaskRunner`], joins the level,
//! and only then moves on. Retries, timeouts and cancellation live here,
//! never in the planner.

mod error;
mod events;
mod executor;
mod runner;
mod runtime;
mod workflow;

pub use error::{RuntimeError, TaskError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, ExecutionId, TaskEvent};
pub use executor::{ExecutionMode, ExecutionReport, PlanExecutor, TaskOutcome, TaskRecord};
pub use runner::{TaskContext, TaskOutput, TaskRunner};
pub use runtime::{PlanRuntime, RuntimeConfig};
pub use workflow::{ErrorHandling, RetryPolicy, Workflow, WorkflowId, WorkflowSettings};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;
