//! Step Scheduling
//!
//! Splits a workflow's steps into ordered groups and runs each group as a
//! set of concurrent tasks. A group finishes only when all of its steps
//! have finished; the next group then starts.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::error::WorkflowError;
use crate::workflow::{StepResult, StepStatus, WorkflowExecution, WorkflowStep};

use super::step::{Deadline, StepExecutor, StepScope};

/// Partitions steps into execution groups of definition indices.
///
/// A step marked `parallel` joins the group being built; any other step
/// starts a new group. Declared dependencies are not consulted.
///
/// # Example
///
/// ```
/// use magex::execution::group_steps;
/// use magex::workflow::WorkflowStep;
///
/// let steps = vec![
///     WorkflowStep::new("build", "shell", "go"),
///     WorkflowStep::new("vet", "shell", "go").in_parallel(),
///     WorkflowStep::new("test", "shell", "go"),
/// ];
/// assert_eq!(group_steps(&steps), vec![vec![0, 1], vec![2]]);
/// ```
pub fn group_steps(steps: &[WorkflowStep]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        if step.parallel && !current.is_empty() {
            current.push(index);
        } else {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            current.push(index);
        }
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Runs the groups of an execution in order.
pub struct StepScheduler {
    executor: StepExecutor,
}

impl StepScheduler {
    pub fn new(executor: StepExecutor) -> Self {
        Self { executor }
    }

    /// Runs every group of `execution`, writing each step's result at its
    /// definition index.
    ///
    /// Returns the first failure of a step without `continue_on_error`,
    /// after its group has finished. Later groups are not started and their
    /// results stay `pending`.
    pub async fn run(&self, execution: &mut WorkflowExecution) -> Result<(), WorkflowError> {
        let settings = &execution.workflow.settings;
        let deadline = match settings.timeout_duration() {
            Ok(timeout) => timeout.map(Deadline::after),
            Err(e) => {
                warn!("Ignoring workflow timeout '{}': {}", settings.timeout, e);
                None
            }
        };

        let scope = StepScope {
            context: Arc::new(execution.context.clone()),
            environment: Arc::new(settings.environment.clone()),
            deadline,
        };

        let groups = group_steps(&execution.workflow.steps);
        let total = groups.len();

        for (group_number, group) in groups.into_iter().enumerate() {
            info!(
                "Executing step group {}/{} ({} steps)",
                group_number + 1,
                total,
                group.len()
            );

            let mut handles = Vec::with_capacity(group.len());
            for &index in &group {
                let step = execution.workflow.steps[index].clone();
                let executor = self.executor.clone();
                let scope = scope.clone();

                let handle = tokio::spawn(async move { executor.execute(&step, &scope).await });
                handles.push((index, handle));
            }

            // Errors indexed by position within the group
            let mut errors: Vec<Option<WorkflowError>> = Vec::with_capacity(handles.len());

            for (index, handle) in handles {
                let step = &execution.workflow.steps[index];
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Step '{}' task panicked: {}", step.name, e);
                        let mut result = StepResult::started(step);
                        result.status = StepStatus::Failed;
                        result.error = format!("step task panicked: {}", e);
                        result.end_time = result.start_time;
                        result
                    }
                };

                let blocking = result.is_failed() && !step.continue_on_error;
                if result.is_failed() && step.continue_on_error {
                    warn!("Step '{}' failed; continuing", step.name);
                }

                errors.push(blocking.then(|| WorkflowError::StepFailed {
                    step: step.name.clone(),
                    error: result.error.clone(),
                }));
                execution.results[index] = result;
            }

            if let Some(err) = errors.into_iter().flatten().next() {
                debug!("Stopping after group {}: {}", group_number + 1, err);
                return Err(err);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::MockRunner;
    use crate::workflow::WorkflowDefinition;
    use std::time::Duration;
    use tokio::time::Instant;

    fn step(name: &str) -> WorkflowStep {
        WorkflowStep::new(name, "shell", name)
    }

    fn scheduler(runner: Arc<MockRunner>) -> StepScheduler {
        StepScheduler::new(StepExecutor::new(runner))
    }

    #[test]
    fn test_all_sequential_steps() {
        let steps = vec![step("a"), step("b"), step("c")];
        assert_eq!(group_steps(&steps), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_parallel_steps_join_previous_group() {
        let steps = vec![
            step("a"),
            step("b").in_parallel(),
            step("c").in_parallel(),
            step("d"),
            step("e").in_parallel(),
        ];
        assert_eq!(group_steps(&steps), vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_leading_parallel_step_starts_group() {
        let steps = vec![step("a").in_parallel(), step("b").in_parallel()];
        assert_eq!(group_steps(&steps), vec![vec![0, 1]]);
        assert!(group_steps(&[]).is_empty());
    }

    #[test]
    fn test_dependencies_do_not_affect_grouping() {
        let steps = vec![step("a"), step("b").in_parallel().depends_on("a")];
        assert_eq!(group_steps(&steps), vec![vec![0, 1]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_steps_start_together() {
        let runner = Arc::new(
            MockRunner::new()
                .with_delay("one", Duration::from_secs(2))
                .with_delay("two", Duration::from_secs(5)),
        );
        let definition = WorkflowDefinition::from_steps(
            "fanout",
            vec![step("zero"), step("one"), step("two").in_parallel(), step("three")],
        );
        let mut execution = WorkflowExecution::start(definition);

        scheduler(runner.clone()).run(&mut execution).await.unwrap();

        let started = |name: &str| runner.calls_to(name)[0].started;
        assert_eq!(started("one"), started("two"));
        assert!(started("three") >= started("two") + Duration::from_secs(5));
        assert!(execution.results.iter().all(|r| r.status == StepStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_land_at_definition_index() {
        let runner = Arc::new(
            MockRunner::new()
                .with_output("first", "1")
                .with_output("second", "2")
                .with_delay("first", Duration::from_secs(3)),
        );
        let definition = WorkflowDefinition::from_steps(
            "order",
            vec![step("first"), step("second").in_parallel()],
        );
        let mut execution = WorkflowExecution::start(definition);

        scheduler(runner).run(&mut execution).await.unwrap();

        assert_eq!(execution.results[0].step.name, "first");
        assert_eq!(execution.results[0].output, "1");
        assert_eq!(execution.results[1].output, "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_failure_stops_later_groups() {
        let runner = Arc::new(MockRunner::new().with_failure("bad"));
        let definition = WorkflowDefinition::from_steps(
            "abort",
            vec![step("bad"), step("good").in_parallel(), step("later")],
        );
        let mut execution = WorkflowExecution::start(definition);

        let err = scheduler(runner.clone()).run(&mut execution).await.unwrap_err();

        assert!(matches!(err, WorkflowError::StepFailed { ref step, .. } if step == "bad"));
        assert_eq!(execution.results[0].status, StepStatus::Failed);
        assert_eq!(execution.results[1].status, StepStatus::Completed);
        assert_eq!(execution.results[2].status, StepStatus::Pending);
        assert!(runner.calls_to("later").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_on_error_keeps_going() {
        let runner = Arc::new(MockRunner::new().with_failure("lint"));
        let definition = WorkflowDefinition::from_steps(
            "tolerant",
            vec![step("lint").continue_on_error(), step("test")],
        );
        let mut execution = WorkflowExecution::start(definition);

        scheduler(runner.clone()).run(&mut execution).await.unwrap();

        assert_eq!(execution.results[0].status, StepStatus::Failed);
        assert_eq!(execution.results[1].status, StepStatus::Completed);
        assert_eq!(runner.calls_to("test").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerated_failure_beside_parallel_sibling() {
        let runner = Arc::new(
            MockRunner::new()
                .with_failure("lint")
                .with_output("unit", "ok")
                .with_delay("unit", Duration::from_secs(2)),
        );
        let definition = WorkflowDefinition::from_steps(
            "mixed",
            vec![
                step("lint").continue_on_error(),
                step("unit").in_parallel(),
                step("package"),
            ],
        );
        assert_eq!(group_steps(&definition.steps), vec![vec![0, 1], vec![2]]);
        let mut execution = WorkflowExecution::start(definition);

        scheduler(runner.clone()).run(&mut execution).await.unwrap();

        assert_eq!(execution.results[0].status, StepStatus::Failed);
        assert!(!execution.results[0].error.is_empty());
        assert_eq!(execution.results[1].status, StepStatus::Completed);
        assert_eq!(execution.results[1].output, "ok");
        assert_eq!(execution.results[2].status, StepStatus::Completed);

        let unit_started = runner.calls_to("unit")[0].started;
        assert_eq!(runner.calls_to("lint")[0].started, unit_started);
        assert!(runner.calls_to("package")[0].started >= unit_started + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_blocking_error_in_group_wins() {
        let runner = Arc::new(
            MockRunner::new()
                .with_failure("x")
                .with_failure("y")
                .with_delay("x", Duration::from_secs(4)),
        );
        let definition = WorkflowDefinition::from_steps(
            "pair",
            vec![step("x"), step("y").in_parallel()],
        );
        let mut execution = WorkflowExecution::start(definition);

        let err = scheduler(runner).run(&mut execution).await.unwrap_err();
        assert!(err.to_string().starts_with("step 'x' failed:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_timeout_bounds_steps() {
        let runner = Arc::new(MockRunner::new().with_delay("hang", Duration::from_secs(3600)));
        let definition = WorkflowDefinition::from_steps("slow", vec![step("hang")]).with_timeout("30s");
        let mut execution = WorkflowExecution::start(definition);

        let started = Instant::now();
        let err = scheduler(runner).run(&mut execution).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(err.to_string().contains("canceled after 30s"));
    }
}
