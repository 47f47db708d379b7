use crate::{Task, TaskId};
use std::collections::HashSet;
use thiserror::Error;

/// A violation of the planner's input constraints
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("Duplicate task id: {0}")]
    DuplicateId(TaskId),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    MissingDependency { task: TaskId, dependency: TaskId },

    #[error("Task '{0}' depends on itself")]
    SelfDependency(TaskId),
}

/// Check a task set against the planner's input constraints
///
/// Returns every issue found, in input order. Cycles longer than one task
/// are not detected here; planning reports those.
pub fn validate<P>(tasks: &[Task<P>]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

    for task in tasks {
        if !seen.insert(task.id.as_str()) {
            issues.push(ValidationIssue::DuplicateId(task.id.clone()));
        }
        for dep in &task.dependencies {
            if dep == &task.id {
                issues.push(ValidationIssue::SelfDependency(task.id.clone()));
            } else if !known.contains(dep.as_str()) {
                issues.push(ValidationIssue::MissingDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    issues
}
