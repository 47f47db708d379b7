use crate::{diagnostics, Diagnosis, Task, TaskId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A full pass placed no task while some remained unplaced. Covers both
    /// dependency cycles and references to ids absent from the input.
    #[error("Unresolvable dependency graph: tasks never became ready: {}", .stuck.join(", "))]
    UnresolvableDependencyGraph { stuck: Vec<TaskId> },
}

impl PlanError {
    /// Ids of the tasks that never became ready, in input order
    pub fn stuck(&self) -> &[TaskId] {
        match self {
            PlanError::UnresolvableDependencyGraph { stuck } => stuck,
        }
    }

    /// Classify the stuck tasks into cycles and dangling references
    pub fn diagnosis<P>(&self, tasks: &[Task<P>]) -> Diagnosis {
        diagnostics::diagnose(tasks, self.stuck())
    }
}
