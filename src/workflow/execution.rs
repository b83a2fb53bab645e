//! Execution Records
//!
//! Runtime state of a single workflow run. An execution owns one
//! [`StepResult`] per definition step, aligned by index, and is persisted
//! once it reaches a terminal status.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::duration;
use super::model::{WorkflowDefinition, WorkflowStep};

/// Process-wide sequence appended to execution IDs.
static EXECUTION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Status of a whole workflow run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step during and after a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step has not been reached
    #[default]
    Pending,
    /// Step is currently executing
    Running,
    /// Step completed successfully
    Completed,
    /// Step failed after all attempts
    Failed,
    /// Step conditions did not hold
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variables, environment and metadata visible to step conditions.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Process environment seen by conditions; never written to disk
    #[serde(skip)]
    pub environment: HashMap<String, String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ExecutionContext {
    /// Builds the context for a run of `definition`.
    ///
    /// Variables come from the definition. The environment is the current
    /// process environment overlaid with the workflow's settings.
    pub fn for_run(definition: &WorkflowDefinition, execution_id: &str) -> Self {
        let mut environment: HashMap<String, String> = std::env::vars().collect();
        environment.extend(
            definition
                .settings
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let mut metadata = HashMap::new();
        metadata.insert("workflow".to_string(), definition.name.clone());
        metadata.insert("version".to_string(), definition.version.clone());
        metadata.insert("execution_id".to_string(), execution_id.to_string());

        Self {
            variables: definition.variables.clone(),
            environment,
            metadata,
        }
    }

    /// String form of a variable, as conditions compare it.
    ///
    /// String values compare without JSON quotes; other values use their
    /// JSON rendering (`true`, `3`, ...).
    pub fn variable_text(&self, name: &str) -> Option<String> {
        self.variables.get(name).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Outcome of one step within an execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Snapshot of the step that was run
    pub step: WorkflowStep,

    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(with = "duration::nanos", default)]
    pub duration: Duration,

    #[serde(default)]
    pub output: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    /// Failed attempts made before the final outcome
    #[serde(default)]
    pub retry_count: u32,
}

impl StepResult {
    /// Placeholder for a step that has not run yet.
    pub fn pending(step: &WorkflowStep) -> Self {
        Self {
            step: step.clone(),
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            duration: Duration::ZERO,
            output: String::new(),
            error: String::new(),
            retry_count: 0,
        }
    }

    /// A result that has just started running.
    pub fn started(step: &WorkflowStep) -> Self {
        Self {
            status: StepStatus::Running,
            start_time: Some(Utc::now()),
            ..Self::pending(step)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// One runtime instance of a workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowExecution {
    pub id: String,

    /// Definition snapshot taken when the run started
    pub workflow: WorkflowDefinition,

    pub start_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    pub status: ExecutionStatus,

    /// One result per definition step, same order
    #[serde(default)]
    pub results: Vec<StepResult>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    #[serde(default)]
    pub context: ExecutionContext,
}

impl WorkflowExecution {
    /// Starts a new execution record for `definition`.
    pub fn start(definition: WorkflowDefinition) -> Self {
        let id = generate_execution_id();
        let context = ExecutionContext::for_run(&definition, &id);
        let results = definition.steps.iter().map(StepResult::pending).collect();

        Self {
            id,
            workflow: definition,
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            results,
            error: String::new(),
            context,
        }
    }

    /// Marks the run as successfully finished.
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    /// Marks the run as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = error.into();
        self.end_time = Some(Utc::now());
    }

    /// Wall time of the run, once it has ended.
    pub fn duration(&self) -> Option<Duration> {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
    }
}

/// Generates an opaque execution ID.
///
/// IDs keep the `exec-<unix seconds>` prefix; the microsecond and sequence
/// suffix keeps runs started in the same second apart.
pub fn generate_execution_id() -> String {
    let now = Utc::now();
    let sequence = EXECUTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "exec-{}-{:06}{:03}",
        now.timestamp(),
        now.timestamp_subsec_micros(),
        sequence % 1000
    )
}
