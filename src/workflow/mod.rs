//! Workflow Definition Module
//!
//! Data structures and persistence for workflow definitions and their
//! runs.
//!
//! # Structure
//!
//! - [`model`]: definitions, steps, conditions and settings
//! - [`execution`]: execution records and step results
//! - [`duration`]: Go-style duration strings (`5m`, `1h30m`)
//! - [`validator`]: structural checks before a run
//! - [`store`]: JSON/YAML persistence under `.mage`
//! - [`templates`]: built-in and user workflow templates
//! - [`schedule`]: scheduled workflow records

pub mod duration;
pub mod execution;
pub mod model;
pub mod schedule;
pub mod store;
pub mod templates;
pub mod validator;

pub use execution::{
    ExecutionContext, ExecutionStatus, StepResult, StepStatus, WorkflowExecution,
};
pub use model::{StepCondition, WorkflowDefinition, WorkflowSettings, WorkflowStep, WorkflowTrigger};
pub use schedule::{ScheduleBook, ScheduledWorkflow};
pub use store::{HistoryQuery, StoreError, WorkflowStore};
pub use templates::{create_from_template, TemplateParameter, WorkflowTemplate};
pub use validator::{is_valid, validate_definition, ValidationError};
