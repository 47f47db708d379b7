// crates/plancli/src/main.rs

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use plancore::{Task, ValidationIssue};
use planruntime::{
    ExecutionEvent, ExecutionMode, PlanRuntime, RuntimeConfig, RuntimeError, TaskContext,
    TaskError, TaskEvent, TaskOutcome, TaskOutput, TaskRunner, Workflow,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plan")]
#[command(about = "Dependency-ordered task planner", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution levels of a workflow file
    Plan {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Print levels as JSON arrays of task ids
        #[arg(long)]
        json: bool,
    },

    /// Check a workflow file for duplicate ids, unknown dependencies and cycles
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Execute a workflow file with a runner that logs each payload
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Run tasks one at a time instead of level-parallel
        #[arg(long)]
        sequential: bool,
    },

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Plan { file, json } => print_plan(&file, json)?,
        Commands::Validate { file } => validate_workflow(&file)?,
        Commands::Run { file, sequential } => run_workflow(&file, sequential).await?,
        Commands::Init { output } => create_example_workflow(&output)?,
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<Workflow<Value>> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    Workflow::from_json(&json).with_context(|| format!("failed to parse {}", file.display()))
}

fn print_plan(file: &Path, as_json: bool) -> Result<()> {
    let workflow = load_workflow(file)?;
    let plan = workflow.plan()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&plan.task_ids())?);
        return Ok(());
    }

    println!("📋 Workflow: {}", workflow.name);
    println!("   Tasks: {}", plan.task_count());
    println!("   Levels: {}", plan.len());
    println!();
    for (index, level) in plan.iter().enumerate() {
        let ids: Vec<&str> = level.iter().map(|t| t.id.as_str()).collect();
        println!("  Level {}: {}", index, ids.join(", "));
    }

    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let issues: Vec<ValidationIssue> = plancore::validate(&workflow.tasks);
    for issue in &issues {
        println!("  ❌ {}", issue);
    }

    if let Err(err) = plancore::plan(&workflow.tasks) {
        println!("  ❌ {}", err);
        for line in err.diagnosis(&workflow.tasks).to_string().lines() {
            println!("     {}", line);
        }
        bail!("workflow '{}' cannot be planned", workflow.name);
    }
    if !issues.is_empty() {
        bail!("workflow '{}' has {} issue(s)", workflow.name, issues.len());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Tasks: {}", workflow.tasks.len());

    Ok(())
}

/// Runner that reports each payload and echoes it back as output
struct LogRunner;

#[async_trait]
impl TaskRunner<Value> for LogRunner {
    async fn run(&self, ctx: TaskContext<Value>) -> std::result::Result<TaskOutput, TaskError> {
        ctx.events.info(format!("payload: {}", ctx.payload()));
        Ok(TaskOutput::new(json!({
            "payload": ctx.payload(),
            "inputs": ctx.inputs,
        })))
    }
}

async fn run_workflow(file: &Path, sequential: bool) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let workflow = load_workflow(file)?;

    if let Err(err) = workflow.plan() {
        if let RuntimeError::Plan(plan_err) = &err {
            print!("{}", plan_err.diagnosis(&workflow.tasks));
        }
        return Err(err.into());
    }

    let mode = if sequential {
        ExecutionMode::Sequential
    } else {
        ExecutionMode::Parallel
    };
    let runtime = PlanRuntime::with_config(RuntimeConfig {
        mode,
        ..RuntimeConfig::default()
    });

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { levels, tasks, .. } => {
                    println!("▶️  Workflow started: {} tasks in {} levels", tasks, levels);
                }
                ExecutionEvent::LevelStarted { level, task_ids, .. } => {
                    println!("  ⏩ Level {}: {}", level, task_ids.join(", "));
                }
                ExecutionEvent::TaskCompleted { task_id, duration_ms, .. } => {
                    println!("    ✅ {} completed in {}ms", task_id, duration_ms);
                }
                ExecutionEvent::TaskRetrying { task_id, attempt, error, .. } => {
                    println!("    🔁 {} attempt {} failed: {}", task_id, attempt, error);
                }
                ExecutionEvent::TaskFailed { task_id, error, .. } => {
                    println!("    ❌ {} failed: {}", task_id, error);
                }
                ExecutionEvent::TaskSkipped { task_id, blocked_by, .. } => {
                    println!("    ⏭️  {} skipped (blocked by {})", task_id, blocked_by);
                }
                ExecutionEvent::TaskEvent { task_id, event: TaskEvent::Info { message }, .. } => {
                    println!("       ℹ️  [{}] {}", task_id, message);
                }
                ExecutionEvent::WorkflowCompleted { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Workflow completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow failed after {}ms", duration_ms);
                    }
                    break;
                }
                _ => {}
            }
        }
    });

    // WorkflowCompleted is emitted on every path once planning succeeded
    let result = runtime.execute(&workflow, Arc::new(LogRunner)).await;
    join_listener(event_task).await;
    let report = result?;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", report.execution_id);
    println!(
        "   Succeeded: {}, failed: {}, skipped: {}",
        report.succeeded(),
        report.failed(),
        report.skipped()
    );
    for record in &report.records {
        if let TaskOutcome::Failed(err) = &record.outcome {
            println!("   {}: {}", record.task_id, err);
        }
    }

    Ok(())
}

/// Wait for the event printer; a crashed printer is logged, never fatal
async fn join_listener(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Event listener stopped abnormally: {}", e);
            false
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example campaign workflow")
        .with_description("Research feeds copywriting and design, which both feed the launch");

    workflow.add_task(Task::new("research", json!({ "agent": "market_research" })));
    workflow.add_task(
        Task::new("copy", json!({ "agent": "copywriter" })).depends_on("research"),
    );
    workflow.add_task(
        Task::new("design", json!({ "agent": "creative_designer" })).depends_on("research"),
    );
    workflow.add_task(
        Task::new("launch", json!({ "agent": "campaign_manager" }))
            .with_dependencies(["copy", "design"]),
    );

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  plan run --file {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_listener_reports_panicked_listener() {
        let crashed = tokio::spawn(async {
            panic!("listener crashed");
        });
        assert!(!join_listener(crashed).await);

        let finished = tokio::spawn(async {});
        assert!(join_listener(finished).await);
    }

    #[test]
    fn test_example_workflow_plans_as_diamond() {
        let path = std::env::temp_dir().join(format!("plan-example-{}.json", std::process::id()));
        create_example_workflow(&path).unwrap();

        let workflow = load_workflow(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let plan = workflow.plan().unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.level(2).unwrap()[0].id, "launch");
    }
}
