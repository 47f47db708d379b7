use crate::{
    EventBus, ExecutionEvent, ExecutionMode, ExecutionReport, PlanExecutor, Result, RuntimeError,
    TaskRunner, Workflow, WorkflowId,
};
use plancore::ExecutionPlan;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Context object owning the executor, the event bus and registered workflows
///
/// Callers construct one and pass it around; nothing here is process-global.
pub struct PlanRuntime<P> {
    config: RuntimeConfig,
    executor: Arc<PlanExecutor>,
    event_bus: Arc<EventBus>,
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow<P>>>>,
}

impl<P> PlanRuntime<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let executor = Arc::new(PlanExecutor::new(config.mode));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            config,
            executor,
            event_bus,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a workflow after checking that it can be planned
    pub async fn register_workflow(&self, workflow: Workflow<P>) -> Result<WorkflowId> {
        workflow.plan()?;
        let id = workflow.id;
        tracing::info!("Registering workflow {} ({})", workflow.name, id);
        self.workflows.write().await.insert(id, workflow);
        Ok(id)
    }

    pub async fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.workflows.read().await.keys().copied().collect()
    }

    pub async fn plan_workflow(&self, workflow_id: WorkflowId) -> Result<ExecutionPlan<P>> {
        let workflows = self.workflows.read().await;
        let workflow = workflows
            .get(&workflow_id)
            .ok_or(RuntimeError::WorkflowNotFound(workflow_id))?;
        workflow.plan()
    }

    /// Execute a registered workflow by id
    pub async fn execute_workflow<R>(
        &self,
        workflow_id: WorkflowId,
        runner: Arc<R>,
    ) -> Result<ExecutionReport>
    where
        R: TaskRunner<P> + ?Sized + 'static,
    {
        let workflow = self
            .workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or(RuntimeError::WorkflowNotFound(workflow_id))?;

        self.execute(&workflow, runner).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute<R>(&self, workflow: &Workflow<P>, runner: Arc<R>) -> Result<ExecutionReport>
    where
        R: TaskRunner<P> + ?Sized + 'static,
    {
        self.execute_with_cancellation(workflow, runner, CancellationToken::new())
            .await
    }

    /// Execute a workflow, stopping early once `cancellation` fires
    pub async fn execute_with_cancellation<R>(
        &self,
        workflow: &Workflow<P>,
        runner: Arc<R>,
        cancellation: CancellationToken,
    ) -> Result<ExecutionReport>
    where
        R: TaskRunner<P> + ?Sized + 'static,
    {
        let plan = workflow.plan()?;
        let mut settings = workflow.settings.clone();
        if let Some(cap) = self.config.max_parallel_tasks {
            settings.max_parallel_tasks = settings.max_parallel_tasks.min(cap);
        }

        self.executor
            .execute(
                workflow.id,
                &plan,
                &settings,
                runner,
                &self.event_bus,
                &cancellation,
            )
            .await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl<P> Default for PlanRuntime<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mode: ExecutionMode,
    pub event_buffer_size: usize,
    /// Upper bound applied on top of each workflow's own parallelism
    pub max_parallel_tasks: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            event_buffer_size: 1000,
            max_parallel_tasks: None,
        }
    }
}
