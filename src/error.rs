//! Crate-level error type.

use thiserror::Error;

use crate::workflow::schedule::ScheduleError;
use crate::workflow::store::StoreError;

/// Errors surfaced by the workflow engine and task operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0} environment variable is required")]
    MissingEnv(&'static str),

    #[error("unknown schedule operation: {0}")]
    UnknownScheduleOperation(String),

    #[error("unknown template operation: {0}")]
    UnknownTemplateOperation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow '{name}' is invalid: {}", join_problems(.problems))]
    Invalid { name: String, problems: Vec<String> },

    #[error("step '{step}' failed: {error}")]
    StepFailed { step: String, error: String },

    #[error("workflow '{name}' failed: {error}")]
    ExecutionFailed { name: String, error: String },

    #[error("{count} workflow(s) failed validation")]
    ValidationFailed { count: usize },

    #[error("no schedule for workflow '{0}'")]
    ScheduleNotFound(String),

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl WorkflowError {
    /// True for errors caused by missing or wrong task configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingEnv(_) | Self::UnknownScheduleOperation(_) | Self::UnknownTemplateOperation(_)
        )
    }
}

fn join_problems(problems: &[String]) -> String {
    problems.join("; ")
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
