//! Workflow Data Model
//!
//! Core data structures describing workflow definitions and their steps.
//!
//! # Example JSON Format
//!
//! ```json
//! {
//!   "name": "ci",
//!   "description": "Continuous Integration workflow",
//!   "version": "1.0.0",
//!   "steps": [
//!     { "name": "build", "type": "shell", "command": "go", "args": ["build", "./..."] },
//!     { "name": "vet", "type": "shell", "command": "go", "args": ["vet", "./..."], "parallel": true },
//!     { "name": "test", "type": "shell", "command": "go", "args": ["test", "./..."], "retry_count": 2 }
//!   ],
//!   "settings": { "timeout": "30m" }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::duration::{parse_optional, DurationParseError};

/// A single unit of work within a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkflowStep {
    /// Step name, unique within a workflow by convention
    #[serde(default)]
    pub name: String,

    /// Step kind tag: `shell`, `command`, `script`, `http` or `notification`
    #[serde(rename = "type", default)]
    pub step_type: String,

    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides applied on top of the workflow settings
    #[serde(default)]
    pub environment: HashMap<String, String>,

    #[serde(default)]
    pub working_dir: String,

    /// Per-attempt timeout, e.g. `"5m"`
    #[serde(default)]
    pub timeout: String,

    /// Number of attempts; zero is treated as one
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub continue_on_error: bool,

    /// Conditions that must all hold for the step to run
    #[serde(default)]
    pub conditions: Vec<StepCondition>,

    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Joins the preceding step's group when set
    #[serde(default)]
    pub parallel: bool,

    /// Names of steps this one depends on (informational, not scheduled on)
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl WorkflowStep {
    /// Creates a step with a name, type and command.
    ///
    /// # Example
    ///
    /// ```
    /// use magex::workflow::WorkflowStep;
    ///
    /// let step = WorkflowStep::new("test", "shell", "go")
    ///     .with_args(["test", "./..."])
    ///     .with_retries(3);
    /// assert_eq!(step.args.len(), 2);
    /// ```
    pub fn new(
        name: impl Into<String>,
        step_type: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            step_type: step_type.into().trim().to_string(),
            command: command.into().trim().to_string(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the step as running alongside the previous one.
    pub fn in_parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_name: impl Into<String>) -> Self {
        self.dependencies.push(step_name.into());
        self
    }

    /// Number of attempts the executor will make.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// Parsed per-step timeout, if one is configured.
    pub fn timeout_duration(&self) -> Result<Option<Duration>, DurationParseError> {
        parse_optional(&self.timeout)
    }

    /// The command line as it would be typed, for logs and reports.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Equality predicate evaluated against the execution context.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StepCondition {
    /// `variable` or `environment`; other kinds always hold
    #[serde(rename = "type", default)]
    pub condition_type: String,

    #[serde(default)]
    pub field: String,

    #[serde(default)]
    pub value: String,
}

impl StepCondition {
    pub fn variable(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            condition_type: "variable".to_string(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn environment(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            condition_type: "environment".to_string(),
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Global settings applied to a whole workflow run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkflowSettings {
    /// Deadline for the whole run, e.g. `"30m"`; empty means none
    #[serde(default)]
    pub timeout: String,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default)]
    pub failure_strategy: String,

    #[serde(default)]
    pub notification_mode: String,

    /// Environment shared by every step
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl WorkflowSettings {
    pub fn timeout_duration(&self) -> Result<Option<Duration>, DurationParseError> {
        parse_optional(&self.timeout)
    }
}

/// Something that can start a workflow run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowTrigger {
    #[serde(rename = "type", default)]
    pub trigger_type: String,

    #[serde(default)]
    pub schedule: String,

    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default)]
    pub conditions: HashMap<String, String>,
}

/// A complete workflow definition as stored on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: String,

    /// Ordered list of steps
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,

    #[serde(default)]
    pub variables: HashMap<String, Value>,

    #[serde(default)]
    pub settings: WorkflowSettings,

    #[serde(default)]
    pub triggers: Vec<WorkflowTrigger>,

    /// Refreshed on every save
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Creates an empty definition with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            description: String::new(),
            version: "1.0.0".to_string(),
            steps: Vec::new(),
            variables: HashMap::new(),
            settings: WorkflowSettings::default(),
            triggers: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Creates a definition from a list of steps.
    pub fn from_steps(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        let mut definition = Self::new(name);
        definition.steps = steps;
        definition
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.settings.timeout = timeout.into();
        self
    }

    /// Returns the number of steps in the workflow.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder() {
        let step = WorkflowStep::new(" build ", "shell", "go")
            .with_args(["build", "./..."])
            .with_timeout("3m")
            .with_env("CGO_ENABLED", "0")
            .in_parallel();

        assert_eq!(step.name, "build");
        assert_eq!(step.command_line(), "go build ./...");
        assert_eq!(step.timeout_duration().unwrap(), Some(Duration::from_secs(180)));
        assert_eq!(step.environment.get("CGO_ENABLED").map(String::as_str), Some("0"));
        assert!(step.parallel);
    }

    #[test]
    fn test_max_attempts_floor() {
        assert_eq!(WorkflowStep::new("a", "shell", "true").max_attempts(), 1);
        assert_eq!(WorkflowStep::new("a", "shell", "true").with_retries(3).max_attempts(), 3);
    }

    #[test]
    fn test_step_deserializes_original_field_names() {
        let json = r#"{
            "name": "lint",
            "type": "shell",
            "command": "golangci-lint",
            "args": ["run"],
            "retry_count": 2,
            "continue_on_error": true,
            "conditions": [{"type": "environment", "field": "CI", "value": "true"}],
            "parallel": true,
            "dependencies": ["build"]
        }"#;

        let step: WorkflowStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.step_type, "shell");
        assert_eq!(step.retry_count, 2);
        assert!(step.continue_on_error);
        assert_eq!(step.conditions[0], StepCondition::environment("CI", "true"));
        assert_eq!(step.dependencies, vec!["build"]);
    }

    #[test]
    fn test_step_serializes_type_tag() {
        let step = WorkflowStep::new("x", "script", "run.sh");
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "script");
        assert!(value.get("step_type").is_none());
    }

    #[test]
    fn test_definition_defaults_when_fields_missing() {
        let definition: WorkflowDefinition =
            serde_json::from_str(r#"{"name": "bare", "steps": []}"#).unwrap();
        assert_eq!(definition.name, "bare");
        assert!(definition.is_empty());
        assert!(definition.settings.timeout.is_empty());
        assert_eq!(definition.settings.timeout_duration().unwrap(), None);
    }

    #[test]
    fn test_definition_from_steps() {
        let definition = WorkflowDefinition::from_steps(
            "demo",
            vec![
                WorkflowStep::new("a", "shell", "echo"),
                WorkflowStep::new("b", "shell", "echo"),
            ],
        );

        assert_eq!(definition.len(), 2);
        assert!(!definition.is_empty());
        assert_eq!(definition.steps[1].name, "b");
    }

    #[test]
    fn test_definition_variables() {
        let definition = WorkflowDefinition::new("vars")
            .with_variable("env", "staging")
            .with_variable("replicas", 3);

        assert_eq!(definition.variables["env"], Value::from("staging"));
        assert_eq!(definition.variables["replicas"], Value::from(3));
    }
}
