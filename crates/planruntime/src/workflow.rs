use crate::{Result, RuntimeError};
use plancore::{ExecutionPlan, Task, TaskId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Named set of tasks plus the settings used to execute them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow<P> {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "Vec::new")]
    pub tasks: Vec<Task<P>>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl<P> Workflow<P> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            tasks: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn add_task(&mut self, task: Task<P>) -> TaskId {
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    pub fn find_task(&self, id: &str) -> Option<&Task<P>> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Reject duplicate ids, self dependencies and unknown dependency ids
    pub fn validate(&self) -> Result<()> {
        let issues = plancore::validate(&self.tasks);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::Invalid(issues))
        }
    }
}

impl<P: Clone> Workflow<P> {
    /// Validate, then split the tasks into execution levels
    pub fn plan(&self) -> Result<ExecutionPlan<P>> {
        self.validate()?;
        Ok(plancore::plan(&self.tasks)?)
    }
}

impl<P: DeserializeOwned> Workflow<P> {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Global workflow settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub max_parallel_tasks: usize,
    pub task_timeout_ms: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
    pub on_error: ErrorHandling,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 10,
            task_timeout_ms: None,
            retry_policy: None,
            on_error: ErrorHandling::StopWorkflow,
        }
    }
}

/// Retry policy applied to each task attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay before retrying after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> u64 {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        (self.delay_ms as f64 * factor) as u64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorHandling {
    /// Finish the current level, then abort
    StopWorkflow,
    /// Keep going; tasks downstream of a failure are skipped
    ContinueOnError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let workflow: Workflow<serde_json::Value> = Workflow::from_json(
            r#"{
                "name": "campaign",
                "tasks": [
                    {"id": "research", "payload": {"agent": "market_research"}},
                    {"id": "copy", "dependencies": ["research"], "payload": null}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(workflow.name, "campaign");
        assert_eq!(workflow.settings, WorkflowSettings::default());
        assert_eq!(workflow.find_task("copy").unwrap().dependencies, vec!["research"]);
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let mut workflow = Workflow::new("broken");
        workflow.add_task(Task::bare("a").depends_on("ghost"));

        let err = workflow.validate().unwrap_err();
        assert!(matches!(err, RuntimeError::Invalid(ref issues) if issues.len() == 1));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_plan_reports_cycles_as_plan_error() {
        let mut workflow = Workflow::new("loop");
        workflow.add_task(Task::bare("a").depends_on("b"));
        workflow.add_task(Task::bare("b").depends_on("a"));

        assert!(matches!(workflow.plan(), Err(RuntimeError::Plan(_))));
    }

    #[test]
    fn test_retry_delay_backs_off() {
        let policy = RetryPolicy {
            max_attempts: 4,
            delay_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_after(1), 100);
        assert_eq!(policy.delay_after(2), 200);
        assert_eq!(policy.delay_after(3), 400);
    }
}
