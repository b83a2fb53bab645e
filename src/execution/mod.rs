//! Workflow Execution Module
//!
//! Runs workflow definitions: groups steps, executes them concurrently
//! within a group and records the outcome.
//!
//! # Architecture
//!
//! - [`engine`]: load, validate, run and persist a workflow
//! - [`scheduler`]: step grouping and the per-group barrier
//! - [`step`]: single step execution with conditions and retries

pub mod engine;
pub mod scheduler;
pub mod step;

pub use engine::WorkflowEngine;
pub use scheduler::{group_steps, StepScheduler};
pub use step::{evaluate_conditions, Deadline, StepExecutor, StepKind, StepScope};
