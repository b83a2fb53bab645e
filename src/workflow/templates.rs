//! Workflow Templates
//!
//! Built-in starting points (`basic`, `ci`, `deploy`) and user templates
//! captured from existing workflows. A new workflow is instantiated from a
//! template with standard settings.

use serde::{Deserialize, Serialize};

use super::model::{WorkflowDefinition, WorkflowSettings, WorkflowStep};

/// Template used when a requested name is unknown.
pub const DEFAULT_TEMPLATE: &str = "basic";

/// Names of the built-in templates.
pub const BUILTIN_TEMPLATES: [&str; 3] = ["basic", "ci", "deploy"];

/// A reusable workflow blueprint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowTemplate {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: String,

    pub definition: WorkflowDefinition,

    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
}

/// A documented knob of a template.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParameter {
    pub name: String,

    #[serde(rename = "type", default)]
    pub param_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub default: String,

    #[serde(default)]
    pub required: bool,
}

impl WorkflowTemplate {
    /// Captures `definition` as a user template.
    pub fn from_definition(
        name: impl Into<String>,
        category: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> Self {
        Self {
            name: name.into(),
            description: definition.description.clone(),
            category: category.into(),
            definition,
            parameters: Vec::new(),
        }
    }

    /// Looks up a built-in template by name.
    pub fn builtin(name: &str) -> Option<Self> {
        let template = match name {
            "basic" => Self::basic(),
            "ci" => Self::builtin_from(
                "ci",
                "Continuous Integration workflow",
                "ci",
                vec![
                    WorkflowStep::new("checkout", "shell", "git").with_args(["pull", "origin", "main"]),
                    WorkflowStep::new("build", "shell", "go").with_args(["build", "./..."]),
                    WorkflowStep::new("test", "shell", "go").with_args(["test", "./..."]),
                    WorkflowStep::new("lint", "shell", "golangci-lint").with_args(["run"]),
                ],
            ),
            "deploy" => Self::builtin_from(
                "deploy",
                "Deployment workflow",
                "deployment",
                vec![
                    WorkflowStep::new("build", "shell", "go")
                        .with_args(["build", "-o", "app", "./cmd/app"]),
                    WorkflowStep::new("deploy", "shell", "kubectl")
                        .with_args(["apply", "-f", "deployment.yaml"]),
                ],
            ),
            _ => return None,
        };
        Some(template)
    }

    /// The `basic` template: a single echo step.
    pub fn basic() -> Self {
        Self::builtin_from(
            DEFAULT_TEMPLATE,
            "Basic workflow template",
            "general",
            vec![WorkflowStep::new("hello", "shell", "echo").with_args(["Hello, World!"])],
        )
    }

    fn builtin_from(name: &str, description: &str, category: &str, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            definition: WorkflowDefinition::from_steps(name, steps).with_description(description),
            parameters: vec![TemplateParameter {
                name: "WORKFLOW_NAME".to_string(),
                param_type: "string".to_string(),
                description: "Name of the workflow to create".to_string(),
                default: String::new(),
                required: true,
            }],
        }
    }

    /// All built-in templates, in display order.
    pub fn builtins() -> Vec<Self> {
        BUILTIN_TEMPLATES
            .iter()
            .filter_map(|name| Self::builtin(name))
            .collect()
    }

    /// Builds a new workflow named `name` from this template.
    ///
    /// Steps and description come from the template; settings, variables
    /// and triggers are reset to the standard defaults.
    pub fn instantiate(&self, name: &str) -> WorkflowDefinition {
        let mut definition = WorkflowDefinition::from_steps(name, self.definition.steps.clone())
            .with_description(self.definition.description.clone());
        definition.settings = standard_settings();
        definition
    }
}

/// Settings every newly created workflow starts with.
pub fn standard_settings() -> WorkflowSettings {
    WorkflowSettings {
        timeout: "30m".to_string(),
        max_retries: 3,
        failure_strategy: "stop".to_string(),
        notification_mode: "on_failure".to_string(),
        ..WorkflowSettings::default()
    }
}

/// Creates a workflow from a built-in template, falling back to `basic`.
pub fn create_from_template(name: &str, template: &str) -> WorkflowDefinition {
    WorkflowTemplate::builtin(template)
        .unwrap_or_else(WorkflowTemplate::basic)
        .instantiate(name)
}
