//! Workflow Execution Engine
//!
//! Orchestrates a complete workflow run:
//! - Loads the definition from the store
//! - Validates it
//! - Runs its step groups through the scheduler
//! - Persists the finished execution record

use std::sync::Arc;

use log::{error, info, warn};

use crate::error::WorkflowError;
use crate::runner::{self, CommandRunner};
use crate::workflow::duration::format_duration;
use crate::workflow::{validate_definition, WorkflowDefinition, WorkflowExecution, WorkflowStore};

use super::scheduler::StepScheduler;
use super::step::StepExecutor;

/// Workflow execution engine.
///
/// Step failures inside a run are reported through the returned
/// execution's status; `Err` is reserved for runs that could not start.
///
/// # Example
///
/// ```rust,no_run
/// use magex::execution::WorkflowEngine;
/// use magex::workflow::WorkflowStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = WorkflowEngine::new(WorkflowStore::default());
///     let execution = engine.execute("ci").await?;
///     println!("{}: {}", execution.id, execution.status);
///     Ok(())
/// }
/// ```
pub struct WorkflowEngine {
    store: WorkflowStore,
    runner: Arc<dyn CommandRunner>,
}

impl WorkflowEngine {
    /// Creates an engine that runs commands through the global runner.
    pub fn new(store: WorkflowStore) -> Self {
        Self::with_runner(store, runner::global())
    }

    pub fn with_runner(store: WorkflowStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self { store, runner }
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    /// Loads the named workflow and runs it.
    pub async fn execute(&self, name: &str) -> Result<WorkflowExecution, WorkflowError> {
        let definition = self.store.load_definition(name)?;
        self.execute_definition(definition).await
    }

    /// Validates and runs an in-memory definition.
    pub async fn execute_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let problems = validate_definition(&definition);
        if !problems.is_empty() {
            return Err(WorkflowError::Invalid {
                name: definition.name,
                problems: problems.iter().map(|p| p.to_string()).collect(),
            });
        }

        let mut execution = WorkflowExecution::start(definition);
        info!(
            "Starting workflow '{}' ({} steps, execution {})",
            execution.workflow.name,
            execution.workflow.len(),
            execution.id
        );

        let scheduler = StepScheduler::new(StepExecutor::new(Arc::clone(&self.runner)));
        match scheduler.run(&mut execution).await {
            Ok(()) => {
                execution.complete();
                info!(
                    "Workflow '{}' completed in {}",
                    execution.workflow.name,
                    execution.duration().map(format_duration).unwrap_or_default()
                );
            }
            Err(e) => {
                error!("Workflow '{}' failed: {}", execution.workflow.name, e);
                execution.fail(e.to_string());
            }
        }

        if let Err(e) = self.store.save_execution(&execution) {
            warn!("Failed to save execution {}: {}", execution.id, e);
        }

        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::MockRunner;
    use crate::workflow::{ExecutionStatus, StepCondition, StepStatus, WorkflowStep};
    use tempfile::tempdir;

    fn engine(store: WorkflowStore, runner: Arc<MockRunner>) -> WorkflowEngine {
        WorkflowEngine::with_runner(store, runner)
    }

    #[tokio::test]
    async fn test_parallel_pair_completes() {
        let temp_dir = tempdir().unwrap();
        let store = WorkflowStore::new(temp_dir.path());
        let mut definition = WorkflowDefinition::from_steps(
            "pair",
            vec![
                WorkflowStep::new("a", "shell", "echo").with_args(["a"]),
                WorkflowStep::new("b", "shell", "echo").with_args(["b"]).in_parallel(),
            ],
        );
        store.save_definition(&mut definition).unwrap();

        let runner = Arc::new(MockRunner::new());
        let execution = engine(store.clone(), runner.clone()).execute("pair").await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.results.len(), 2);
        assert!(execution.results.iter().all(|r| r.status == StepStatus::Completed));
        assert!(execution.error.is_empty());
        assert_eq!(crate::execution::group_steps(&execution.workflow.steps).len(), 1);
        assert_eq!(runner.calls_to("echo").len(), 2);

        let saved = store.load_execution(&execution.id).unwrap();
        assert_eq!(saved.status, ExecutionStatus::Completed);
        assert!(saved.end_time.is_some());
    }

    #[tokio::test]
    async fn test_failed_step_persists_partial_results() {
        let temp_dir = tempdir().unwrap();
        let store = WorkflowStore::new(temp_dir.path());
        let definition = WorkflowDefinition::from_steps(
            "broken",
            vec![
                WorkflowStep::new("compile", "shell", "go").with_args(["build"]),
                WorkflowStep::new("ship", "shell", "goreleaser"),
            ],
        );

        let runner = Arc::new(MockRunner::new().with_failure("go"));
        let execution = engine(store.clone(), runner)
            .execute_definition(definition)
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.starts_with("step 'compile' failed:"));
        assert_eq!(execution.results[0].status, StepStatus::Failed);
        assert_eq!(execution.results[1].status, StepStatus::Pending);

        let saved = store.load_execution(&execution.id).unwrap();
        assert_eq!(saved.status, ExecutionStatus::Failed);
        assert_eq!(saved.results[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_saved_execution_omits_process_environment() {
        std::env::set_var("MAGEX_ENGINE_SECRET_TOKEN", "hunter2-secret");
        std::env::set_var("MAGEX_ENGINE_STAGE", "ci");

        let temp_dir = tempdir().unwrap();
        let store = WorkflowStore::new(temp_dir.path());
        let definition = WorkflowDefinition::from_steps(
            "leaky",
            vec![WorkflowStep::new("hi", "shell", "echo")
                .with_condition(StepCondition::environment("MAGEX_ENGINE_STAGE", "ci"))],
        );

        let runner = Arc::new(MockRunner::new());
        let execution = engine(store.clone(), runner.clone())
            .execute_definition(definition)
            .await
            .unwrap();

        // Conditions still see the live environment
        assert_eq!(execution.results[0].status, StepStatus::Completed);
        assert_eq!(runner.calls_to("echo").len(), 1);

        let saved = std::fs::read_to_string(store.execution_path(&execution.id).unwrap()).unwrap();
        assert!(!saved.contains("hunter2-secret"));
        assert!(!saved.contains("MAGEX_ENGINE_SECRET_TOKEN"));

        std::env::remove_var("MAGEX_ENGINE_SECRET_TOKEN");
        std::env::remove_var("MAGEX_ENGINE_STAGE");
    }

    #[tokio::test]
    async fn test_missing_workflow_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let engine = engine(WorkflowStore::new(temp_dir.path()), Arc::new(MockRunner::new()));

        let err = engine.execute("nope").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Store(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_invalid_definition_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let engine = engine(WorkflowStore::new(temp_dir.path()), runner.clone());

        let err = engine
            .execute_definition(WorkflowDefinition::new("empty"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "workflow 'empty' is invalid: Workflow has no steps");
        assert!(runner.calls().is_empty());
        assert!(engine.store().list_executions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_store_still_returns_execution() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("store");
        std::fs::write(&blocker, "not a directory").unwrap();

        let definition =
            WorkflowDefinition::from_steps("ok", vec![WorkflowStep::new("hi", "shell", "echo")]);
        let execution = engine(WorkflowStore::new(&blocker), Arc::new(MockRunner::new()))
            .execute_definition(definition)
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
    }
}
