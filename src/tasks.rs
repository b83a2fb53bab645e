//! Workflow Tasks
//!
//! The `workflow:*` operations exposed to the command line. Parameters
//! come from environment variables (`WORKFLOW`, `TEMPLATE`, `LIMIT`, ...)
//! captured in a [`TaskEnv`]; every operation returns data and leaves
//! rendering to the caller.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};

use crate::error::{Result, WorkflowError};
use crate::execution::WorkflowEngine;
use crate::runner::CommandRunner;
use crate::workflow::templates::DEFAULT_TEMPLATE;
use crate::workflow::{
    validate_definition, ExecutionStatus, HistoryQuery, ScheduleBook, ScheduledWorkflow,
    WorkflowDefinition, WorkflowExecution, WorkflowStore, WorkflowTemplate,
};

/// Number of executions `history` returns when `LIMIT` is not set.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Task parameters read from the environment.
#[derive(Debug, Clone, Default)]
pub struct TaskEnv {
    vars: HashMap<String, String>,
}

impl TaskEnv {
    pub const WORKFLOW: &'static str = "WORKFLOW";
    pub const WORKFLOW_NAME: &'static str = "WORKFLOW_NAME";
    pub const TEMPLATE: &'static str = "TEMPLATE";
    pub const EXECUTION_ID: &'static str = "EXECUTION_ID";
    pub const SCHEDULE: &'static str = "SCHEDULE";
    pub const SCHEDULE_OPERATION: &'static str = "SCHEDULE_OPERATION";
    pub const TEMPLATE_OPERATION: &'static str = "TEMPLATE_OPERATION";
    pub const LIMIT: &'static str = "LIMIT";

    /// Snapshot of the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Value of `key`, treating blank values as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(WorkflowError::MissingEnv(key))
    }

    /// History limit; zero or an unparseable value means unlimited.
    pub fn limit(&self) -> usize {
        match self.get(Self::LIMIT) {
            None => DEFAULT_HISTORY_LIMIT,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Ignoring LIMIT '{}'; showing all executions", raw);
                0
            }),
        }
    }
}

/// Result of a `schedule` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Listed(Vec<ScheduledWorkflow>),
    Added(ScheduledWorkflow),
    Updated(ScheduledWorkflow),
    Removed(String),
}

/// Result of a `template` operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateOutcome {
    /// Built-in templates followed by stored ones
    Listed(Vec<WorkflowTemplate>),
    Created(WorkflowTemplate),
    Updated(WorkflowTemplate),
    Deleted(String),
}

/// Validation outcome for one workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub name: String,
    pub problems: Vec<String>,
}

impl ValidationReport {
    fn for_definition(definition: &WorkflowDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            problems: validate_definition(definition)
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Entry point for the workflow operations.
pub struct WorkflowTasks {
    engine: WorkflowEngine,
}

impl WorkflowTasks {
    /// Uses the global command runner.
    pub fn new(store: WorkflowStore) -> Self {
        Self {
            engine: WorkflowEngine::new(store),
        }
    }

    pub fn with_runner(store: WorkflowStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            engine: WorkflowEngine::with_runner(store, runner),
        }
    }

    pub fn store(&self) -> &WorkflowStore {
        self.engine.store()
    }

    /// Runs `WORKFLOW`. A run that ends `failed` is returned as an error.
    pub async fn execute(&self, env: &TaskEnv) -> Result<WorkflowExecution> {
        let name = env.require(TaskEnv::WORKFLOW)?;
        let execution = self.engine.execute(name).await?;

        if execution.status == ExecutionStatus::Failed {
            return Err(WorkflowError::ExecutionFailed {
                name: name.to_string(),
                error: execution.error,
            });
        }
        Ok(execution)
    }

    /// All stored workflow definitions, sorted by name.
    pub fn list(&self) -> Result<Vec<WorkflowDefinition>> {
        Ok(self.store().discover_definitions()?)
    }

    /// The execution named by `EXECUTION_ID`, or every execution.
    pub fn status(&self, env: &TaskEnv) -> Result<Vec<WorkflowExecution>> {
        match env.get(TaskEnv::EXECUTION_ID) {
            Some(id) => Ok(vec![self.store().load_execution(id)?]),
            None => Ok(self.store().list_executions()?),
        }
    }

    /// Creates `WORKFLOW_NAME` from `TEMPLATE` (default `basic`).
    ///
    /// Stored templates take precedence over built-in ones; unknown
    /// template names fall back to `basic`.
    pub fn create(&self, env: &TaskEnv) -> Result<(WorkflowDefinition, PathBuf)> {
        let name = env.require(TaskEnv::WORKFLOW_NAME)?;
        let template_name = env.get(TaskEnv::TEMPLATE).unwrap_or(DEFAULT_TEMPLATE);

        let template = match self.store().load_template(template_name) {
            Ok(template) => template,
            Err(e) if e.is_not_found() => WorkflowTemplate::builtin(template_name).unwrap_or_else(|| {
                warn!("Unknown template '{}'; using '{}'", template_name, DEFAULT_TEMPLATE);
                WorkflowTemplate::basic()
            }),
            Err(e) => return Err(e.into()),
        };

        let mut definition = template.instantiate(name);
        let path = self.store().save_definition(&mut definition)?;
        info!("Created workflow '{}' from template '{}'", name, template.name);
        Ok((definition, path))
    }

    /// Validates `WORKFLOW`, or every stored workflow when unset.
    pub fn validate(&self, env: &TaskEnv) -> Result<Vec<ValidationReport>> {
        if let Some(name) = env.get(TaskEnv::WORKFLOW) {
            let report = ValidationReport::for_definition(&self.store().load_definition(name)?);
            if !report.is_valid() {
                return Err(WorkflowError::Invalid {
                    name: report.name,
                    problems: report.problems,
                });
            }
            return Ok(vec![report]);
        }

        let reports: Vec<ValidationReport> = self
            .list()?
            .iter()
            .map(ValidationReport::for_definition)
            .collect();

        let invalid = reports.iter().filter(|r| !r.is_valid()).count();
        for report in reports.iter().filter(|r| !r.is_valid()) {
            warn!("Workflow '{}' is invalid: {}", report.name, report.problems.join("; "));
        }
        if invalid > 0 {
            return Err(WorkflowError::ValidationFailed { count: invalid });
        }
        Ok(reports)
    }

    /// Manages schedules per `SCHEDULE_OPERATION` (default `list`).
    pub fn schedule(&self, env: &TaskEnv) -> Result<ScheduleOutcome> {
        let operation = env.get(TaskEnv::SCHEDULE_OPERATION).unwrap_or("list");
        let mut book = ScheduleBook::new(self.store().load_schedules()?);

        let outcome = match operation {
            "list" => return Ok(ScheduleOutcome::Listed(book.into_entries())),
            "add" => {
                let name = env.require(TaskEnv::WORKFLOW)?;
                let expression = env.require(TaskEnv::SCHEDULE)?;
                self.store().load_definition(name)?;
                ScheduleOutcome::Added(book.add(name, expression)?.clone())
            }
            "update" => {
                let name = env.require(TaskEnv::WORKFLOW)?;
                let expression = env.require(TaskEnv::SCHEDULE)?;
                match book.update(name, expression)? {
                    Some(entry) => ScheduleOutcome::Updated(entry.clone()),
                    None => return Err(WorkflowError::ScheduleNotFound(name.to_string())),
                }
            }
            "remove" => {
                let name = env.require(TaskEnv::WORKFLOW)?;
                if !book.remove(name) {
                    return Err(WorkflowError::ScheduleNotFound(name.to_string()));
                }
                ScheduleOutcome::Removed(name.to_string())
            }
            other => return Err(WorkflowError::UnknownScheduleOperation(other.to_string())),
        };

        self.store().save_schedules(book.entries())?;
        Ok(outcome)
    }

    /// Manages user templates per `TEMPLATE_OPERATION` (default `list`).
    ///
    /// `create` and `update` capture the workflow named by `WORKFLOW` as
    /// template `TEMPLATE`.
    pub fn template(&self, env: &TaskEnv) -> Result<TemplateOutcome> {
        let operation = env.get(TaskEnv::TEMPLATE_OPERATION).unwrap_or("list");

        match operation {
            "list" => {
                let mut templates = WorkflowTemplate::builtins();
                templates.extend(self.store().list_templates()?);
                Ok(TemplateOutcome::Listed(templates))
            }
            "create" => {
                let template = self.capture_template(env, "custom")?;
                Ok(TemplateOutcome::Created(template))
            }
            "update" => {
                let name = env.require(TaskEnv::TEMPLATE)?;
                let existing = match self.store().load_template(name) {
                    Ok(existing) => existing,
                    Err(e) if e.is_not_found() => {
                        return Err(WorkflowError::TemplateNotFound(name.to_string()))
                    }
                    Err(e) => return Err(e.into()),
                };
                let template = self.capture_template(env, &existing.category)?;
                Ok(TemplateOutcome::Updated(template))
            }
            "delete" => {
                let name = env.require(TaskEnv::TEMPLATE)?;
                if !self.store().delete_template(name)? {
                    return Err(WorkflowError::TemplateNotFound(name.to_string()));
                }
                Ok(TemplateOutcome::Deleted(name.to_string()))
            }
            other => Err(WorkflowError::UnknownTemplateOperation(other.to_string())),
        }
    }

    fn capture_template(&self, env: &TaskEnv, category: &str) -> Result<WorkflowTemplate> {
        let name = env.require(TaskEnv::TEMPLATE)?;
        let source = env.require(TaskEnv::WORKFLOW)?;

        let template = WorkflowTemplate::from_definition(name, category, self.store().load_definition(source)?);
        self.store().save_template(&template)?;
        Ok(template)
    }

    /// Recent executions, newest first, optionally for one `WORKFLOW`.
    pub fn history(&self, env: &TaskEnv) -> Result<Vec<WorkflowExecution>> {
        let query = HistoryQuery {
            workflow: env.get(TaskEnv::WORKFLOW).map(str::to_string),
            limit: env.limit(),
        };
        Ok(self.store().history(&query)?)
    }
}
