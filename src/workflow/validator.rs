//! Workflow Validation
//!
//! Structural checks run before a definition is executed:
//! - Workflow has a name and at least one step
//! - Every step has a name and a type
//!
//! Softer problems (duplicate step names, unknown dependencies, timeouts
//! that do not parse) are logged as warnings and do not make a definition
//! invalid.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::{WorkflowDefinition, WorkflowStep};
use super::store::is_document_name;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyName,
    /// Name cannot be used as a file name in the store
    UnsafeName(String),
    NoSteps,
    /// Step at this position has no name
    EmptyStepName(usize),
    EmptyStepType(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "Workflow has no name"),
            Self::UnsafeName(name) => write!(
                f,
                "Workflow name '{}' must not contain path separators or '..'",
                name
            ),
            Self::NoSteps => write!(f, "Workflow has no steps"),
            Self::EmptyStepName(index) => write!(f, "Step #{} has an empty name", index + 1),
            Self::EmptyStepType(step) => write!(f, "Step '{}' has no type specified", step),
        }
    }
}

/// Validates a single step's fields.
fn validate_step(index: usize, step: &WorkflowStep) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.name.trim().is_empty() {
        errors.push(ValidationError::EmptyStepName(index));
        return errors;
    }

    if step.step_type.trim().is_empty() {
        errors.push(ValidationError::EmptyStepType(step.name.clone()));
    }

    if let Err(e) = step.timeout_duration() {
        warn!("Step '{}': ignoring timeout '{}': {}", step.name, step.timeout, e);
    }

    if step.parallel && index == 0 {
        debug!("Step '{}' is parallel but starts the workflow", step.name);
    }

    errors
}

/// Validates a whole definition, returning every problem found.
///
/// An empty list means the definition can be executed.
pub fn validate_definition(definition: &WorkflowDefinition) -> Vec<ValidationError> {
    debug!(
        "Validating workflow '{}' with {} steps",
        definition.name,
        definition.len()
    );

    let mut errors = Vec::new();

    if definition.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    } else if !is_document_name(&definition.name) {
        errors.push(ValidationError::UnsafeName(definition.name.clone()));
    }

    if definition.is_empty() {
        errors.push(ValidationError::NoSteps);
        return errors;
    }

    let names: HashSet<&str> = definition.steps.iter().map(|s| s.name.as_str()).collect();
    if names.len() != definition.len() {
        warn!("Workflow '{}' has duplicate step names", definition.name);
    }

    for (index, step) in definition.steps.iter().enumerate() {
        errors.extend(validate_step(index, step));

        for dependency in &step.dependencies {
            if !names.contains(dependency.as_str()) {
                warn!(
                    "Step '{}' depends on unknown step '{}'",
                    step.name, dependency
                );
            }
        }
    }

    if let Err(e) = definition.settings.timeout_duration() {
        warn!(
            "Workflow '{}': ignoring timeout '{}': {}",
            definition.name, definition.settings.timeout, e
        );
    }

    if errors.is_empty() {
        info!("Workflow '{}' is valid", definition.name);
    }
    errors
}

/// True when [`validate_definition`] finds no problems.
pub fn is_valid(definition: &WorkflowDefinition) -> bool {
    validate_definition(definition).is_empty()
}
