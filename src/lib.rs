//! magex - Workflow Execution Core
//!
//! Runs multi-step build workflows for the mage-x task runner: steps are
//! grouped into ordered batches, run concurrently within a batch, retried
//! on failure and recorded as persisted executions.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`runner`]: External command execution with adaptive timeouts
//! - [`workflow`]: Definitions, execution records and the file store
//! - [`execution`]: Step executor, scheduler and workflow engine
//! - [`tasks`]: The `workflow:*` operations driven by environment variables
//!
//! # Example
//!
//! ```rust,no_run
//! use magex::execution::WorkflowEngine;
//! use magex::workflow::{WorkflowDefinition, WorkflowStep, WorkflowStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let definition = WorkflowDefinition::from_steps(
//!         "ci",
//!         vec![
//!             WorkflowStep::new("build", "shell", "go").with_args(["build", "./..."]),
//!             WorkflowStep::new("vet", "shell", "go").with_args(["vet", "./..."]).in_parallel(),
//!             WorkflowStep::new("test", "shell", "go").with_args(["test", "./..."]).with_retries(2),
//!         ],
//!     );
//!
//!     let engine = WorkflowEngine::new(WorkflowStore::default());
//!     let execution = engine.execute_definition(definition).await?;
//!     println!("{} finished as {}", execution.id, execution.status);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod runner;
pub mod tasks;
pub mod workflow;

// Re-export commonly used types
pub use error::{Result, WorkflowError};
pub use execution::WorkflowEngine;
pub use runner::{CommandRunner, Invocation, RunnerError};
pub use workflow::{WorkflowDefinition, WorkflowExecution, WorkflowStep, WorkflowStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "magex-workflow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "magex-workflow");
    }

    #[test]
    fn test_module_exports_step() {
        let step = WorkflowStep::new("test", "shell", "go");
        assert_eq!(step.name, "test");
        assert_eq!(step.step_type, "shell");
    }

    #[test]
    fn test_module_exports_definition() {
        let definition = WorkflowDefinition::new("empty");
        assert!(definition.is_empty());
        assert_eq!(definition.version, "1.0.0");
    }
}
