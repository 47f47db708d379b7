//! Core planning types for the task planner
//!
//! This crate provides the task model and the dependency-ordered planner
//! that turns a set of tasks into execution levels. It has no runtime
//! dependencies and performs no I/O.

mod diagnostics;
mod error;
mod plan;
mod task;
mod validate;

pub use diagnostics::{diagnose, Diagnosis};
pub use error::PlanError;
pub use plan::{plan, plan_owned, ExecutionPlan};
pub use task::{Task, TaskId};
pub use validate::{validate, ValidationIssue};

/// Result type for planning operations
pub type Result<T> = std::result::Result<T, PlanError>;
