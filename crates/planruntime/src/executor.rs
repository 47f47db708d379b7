use crate::{
    ErrorHandling, EventBus, ExecutionEvent, ExecutionId, Result, RetryPolicy, RuntimeError,
    TaskContext, TaskError, TaskOutput, TaskRunner, WorkflowId, WorkflowSettings,
};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use plancore::{ExecutionPlan, Task, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

/// How the tasks of one level are driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Run the tasks of a level concurrently, bounded by `max_parallel_tasks`
    #[default]
    Parallel,
    /// Run tasks one at a time in plan order
    Sequential,
}

/// Executes a plan level by level
///
/// Every task of a level is joined before the next level starts, so a task
/// always sees the outputs of all its dependencies.
pub struct PlanExecutor {
    mode: ExecutionMode,
}

impl PlanExecutor {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub async fn execute<P, R>(
        &self,
        workflow_id: WorkflowId,
        plan: &ExecutionPlan<P>,
        settings: &WorkflowSettings,
        runner: Arc<R>,
        event_bus: &EventBus,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionReport>
    where
        P: Clone + Send + Sync + 'static,
        R: TaskRunner<P> + ?Sized + 'static,
    {
        let execution_id = ExecutionId::new_v4();
        let start_time = Instant::now();

        event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id,
            levels: plan.len(),
            tasks: plan.task_count(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            %execution_id,
            levels = plan.len(),
            tasks = plan.task_count(),
            mode = ?self.mode,
            "Starting plan execution"
        );

        let result = self
            .execute_levels(execution_id, plan, settings, runner, event_bus, cancellation)
            .await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let success = matches!(&result, Ok(state) if state.failure.is_none());

        event_bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            success,
            duration_ms,
            timestamp: Utc::now(),
        });

        let state = result?;
        Ok(ExecutionReport {
            execution_id,
            workflow_id,
            levels: plan.len(),
            records: state.records,
            duration_ms,
        })
    }

    async fn execute_levels<P, R>(
        &self,
        execution_id: ExecutionId,
        plan: &ExecutionPlan<P>,
        settings: &WorkflowSettings,
        runner: Arc<R>,
        event_bus: &EventBus,
        cancellation: &CancellationToken,
    ) -> Result<RunState>
    where
        P: Clone + Send + Sync + 'static,
        R: TaskRunner<P> + ?Sized + 'static,
    {
        let policy = AttemptPolicy::from_settings(settings);
        let semaphore = Arc::new(Semaphore::new(settings.max_parallel_tasks.max(1)));
        let stop_on_error = settings.on_error == ErrorHandling::StopWorkflow;
        let mut state = RunState::default();

        for (level, tasks) in plan.iter().enumerate() {
            if cancellation.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }

            let level_start = Instant::now();
            event_bus.emit(ExecutionEvent::LevelStarted {
                execution_id,
                level,
                task_ids: tasks.iter().map(|t| t.id.clone()).collect(),
                timestamp: Utc::now(),
            });
            tracing::debug!(level, tasks = tasks.len(), "Starting level");

            let mut running = FuturesUnordered::new();
            let mut handled = 0;

            for task in tasks {
                if self.mode == ExecutionMode::Sequential && cancellation.is_cancelled() {
                    break;
                }
                handled += 1;

                if let Some(blocker) = state.blocker_of(task) {
                    tracing::warn!("Skipping task {}: dependency {} did not succeed", task.id, blocker);
                    event_bus.emit(ExecutionEvent::TaskSkipped {
                        execution_id,
                        task_id: task.id.clone(),
                        blocked_by: blocker.clone(),
                        timestamp: Utc::now(),
                    });
                    state.skip(task, level, blocker);
                    continue;
                }

                let ctx = TaskContext {
                    execution_id,
                    task: task.clone(),
                    level,
                    attempt: 1,
                    inputs: state.inputs_for(task),
                    events: event_bus.create_emitter(execution_id, task.id.clone()),
                    cancellation: cancellation.child_token(),
                };

                let job = run_task(runner.clone(), ctx, policy.clone());

                match self.mode {
                    ExecutionMode::Sequential => {
                        let finished = job.await;
                        state.finish(finished, event_bus, execution_id);
                        if stop_on_error && state.failure.is_some() {
                            break;
                        }
                    }
                    ExecutionMode::Parallel => {
                        let semaphore = semaphore.clone();
                        let task_id = task.id.clone();
                        let handle = tokio::spawn(async move {
                            let _permit = semaphore.acquire_owned().await.ok();
                            job.await
                        });
                        running.push(async move { (task_id, handle.await) });
                    }
                }
            }

            // Join the whole level before looking at the next one; a panicking
            // runner fails its own task only
            while let Some((task_id, joined)) = running.next().await {
                let finished = joined.unwrap_or_else(|e| FinishedTask::panicked(task_id, level, &e));
                state.finish(finished, event_bus, execution_id);
            }

            if handled == tasks.len() {
                event_bus.emit(ExecutionEvent::LevelCompleted {
                    execution_id,
                    level,
                    duration_ms: level_start.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });
            } else {
                tracing::debug!(level, handled, "Level interrupted before all tasks ran");
            }

            if cancellation.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }

            if stop_on_error {
                if let Some((task, source)) = state.failure.take() {
                    return Err(RuntimeError::TaskFailed { task, source });
                }
            }
        }

        Ok(state)
    }
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self::new(ExecutionMode::default())
    }
}

/// Per-attempt limits derived from the workflow settings
#[derive(Debug, Clone)]
struct AttemptPolicy {
    timeout_ms: Option<u64>,
    retry: RetryPolicy,
}

impl AttemptPolicy {
    fn from_settings(settings: &WorkflowSettings) -> Self {
        let retry = settings.retry_policy.clone().unwrap_or(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        });
        Self {
            timeout_ms: settings.task_timeout_ms,
            retry,
        }
    }
}

/// Result of driving one task through all of its attempts
struct FinishedTask {
    task_id: TaskId,
    level: usize,
    result: std::result::Result<TaskOutput, TaskError>,
    attempts: u32,
    duration_ms: u64,
}

impl FinishedTask {
    fn panicked(task_id: TaskId, level: usize, err: &tokio::task::JoinError) -> Self {
        tracing::error!("Runner for task {} panicked: {}", task_id, err);
        Self {
            task_id,
            level,
            result: Err(TaskError::Failed(format!("Runner panicked: {}", err))),
            attempts: 1,
            duration_ms: 0,
        }
    }
}

async fn run_task<P, R>(
    runner: Arc<R>,
    mut ctx: TaskContext<P>,
    policy: AttemptPolicy,
) -> FinishedTask
where
    P: Clone + Send + Sync + 'static,
    R: TaskRunner<P> + ?Sized + 'static,
{
    let start = Instant::now();
    let max_attempts = policy.retry.max_attempts.max(1);
    let cancellation = ctx.cancellation.clone();
    let mut attempt = 0;

    let result = loop {
        // never hand a cancelled task to the runner, not even a retry
        if cancellation.is_cancelled() {
            break Err(TaskError::Cancelled);
        }
        attempt += 1;
        if attempt == 1 {
            ctx.events.started(ctx.level);
        }

        ctx.attempt = attempt;
        let call = runner.run(ctx.clone());
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(TaskError::Cancelled),
            outcome = with_timeout(call, policy.timeout_ms) => outcome,
        };

        match outcome {
            Ok(output) => break Ok(output),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay_ms = policy.retry.delay_after(attempt);
                tracing::warn!(
                    "Task {} attempt {}/{} failed: {}; retrying in {}ms",
                    ctx.task.id,
                    attempt,
                    max_attempts,
                    e,
                    delay_ms
                );
                ctx.events.retrying(attempt, &e, delay_ms);
                let cancelled = tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => true,
                    _ = sleep(Duration::from_millis(delay_ms)) => false,
                };
                if cancelled {
                    break Err(TaskError::Cancelled);
                }
            }
            Err(e) => break Err(e),
        }
    };

    FinishedTask {
        task_id: ctx.task.id,
        level: ctx.level,
        result,
        attempts: attempt,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

async fn with_timeout<F>(call: F, timeout_ms: Option<u64>) -> std::result::Result<TaskOutput, TaskError>
where
    F: std::future::Future<Output = std::result::Result<TaskOutput, TaskError>>,
{
    match timeout_ms {
        Some(ms) => match timeout(Duration::from_millis(ms), call).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::Timeout { ms }),
        },
        None => call.await,
    }
}

/// Bookkeeping for one execution
#[derive(Default)]
struct RunState {
    records: Vec<TaskRecord>,
    outputs: HashMap<TaskId, serde_json::Value>,
    /// Tasks that failed or were skipped; their dependents are skipped
    unsuccessful: HashSet<TaskId>,
    failure: Option<(TaskId, TaskError)>,
}

impl RunState {
    fn blocker_of<'a, P>(&self, task: &'a Task<P>) -> Option<&'a TaskId> {
        task.dependencies
            .iter()
            .find(|dep| self.unsuccessful.contains(dep.as_str()))
    }

    fn inputs_for<P>(&self, task: &Task<P>) -> HashMap<TaskId, serde_json::Value> {
        task.dependencies
            .iter()
            .filter_map(|dep| self.outputs.get(dep).map(|v| (dep.clone(), v.clone())))
            .collect()
    }

    fn skip<P>(&mut self, task: &Task<P>, level: usize, blocker: &TaskId) {
        self.unsuccessful.insert(task.id.clone());
        self.records.push(TaskRecord {
            task_id: task.id.clone(),
            level,
            outcome: TaskOutcome::Skipped {
                blocked_by: blocker.clone(),
            },
            attempts: 0,
            duration_ms: 0,
        });
    }

    fn finish(&mut self, finished: FinishedTask, event_bus: &EventBus, execution_id: ExecutionId) {
        let FinishedTask {
            task_id,
            level,
            result,
            attempts,
            duration_ms,
        } = finished;

        let outcome = match result {
            Ok(output) => {
                tracing::info!("Task {} completed in {}ms", task_id, duration_ms);
                event_bus.emit(ExecutionEvent::TaskCompleted {
                    execution_id,
                    task_id: task_id.clone(),
                    attempts,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                self.outputs.insert(task_id.clone(), output.value.clone());
                TaskOutcome::Succeeded(output)
            }
            Err(e) => {
                tracing::error!("Task {} failed after {} attempt(s): {}", task_id, attempts, e);
                event_bus.emit(ExecutionEvent::TaskFailed {
                    execution_id,
                    task_id: task_id.clone(),
                    error: e.to_string(),
                    attempts,
                    timestamp: Utc::now(),
                });
                self.unsuccessful.insert(task_id.clone());
                if self.failure.is_none() {
                    self.failure = Some((task_id.clone(), e.clone()));
                }
                TaskOutcome::Failed(e)
            }
        };

        self.records.push(TaskRecord {
            task_id,
            level,
            outcome,
            attempts,
            duration_ms,
        });
    }
}

/// How a single task ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded(TaskOutput),
    Failed(TaskError),
    Skipped { blocked_by: TaskId },
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub level: usize,
    pub outcome: TaskOutcome,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Result of executing a plan
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub levels: usize,
    /// Records in completion order
    pub records: Vec<TaskRecord>,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn record(&self, task_id: &str) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.task_id == task_id)
    }

    pub fn output(&self, task_id: &str) -> Option<&serde_json::Value> {
        match &self.record(task_id)?.outcome {
            TaskOutcome::Succeeded(output) => Some(&output.value),
            _ => None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Succeeded(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Skipped { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.succeeded() == self.records.len()
    }

    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}
