//! Step Execution
//!
//! Runs a single workflow step: evaluates its conditions, dispatches on
//! its kind and retries failed attempts with a linear backoff. Shell and
//! command steps go through the injected [`CommandRunner`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::runner::{CommandRunner, Invocation, RunnerError};
use crate::workflow::{ExecutionContext, StepCondition, StepResult, StepStatus, WorkflowStep};

/// Delay unit between attempts; attempt `n` waits `n` units.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Errors from a single attempt of a step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("unsupported step type: {0}")]
    UnsupportedType(String),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// What a step does, parsed from its `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Shell,
    Command,
    Script,
    Http,
    Notification,
}

impl FromStr for StepKind {
    type Err = StepError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "shell" => Ok(Self::Shell),
            "command" => Ok(Self::Command),
            "script" => Ok(Self::Script),
            "http" => Ok(Self::Http),
            "notification" => Ok(Self::Notification),
            other => Err(StepError::UnsupportedType(other.to_string())),
        }
    }
}

impl StepKind {
    /// Canned output for kinds that are accepted but not carried out.
    fn placeholder_output(&self) -> Option<&'static str> {
        match self {
            Self::Script => Some("Script executed successfully"),
            Self::Http => Some("HTTP request completed"),
            Self::Notification => Some("Notification sent"),
            Self::Shell | Self::Command => None,
        }
    }
}

/// A point in time together with the timeout that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: Instant,
    /// Configured timeout, reported when the deadline cancels a command
    pub window: Duration,
}

impl Deadline {
    /// Deadline `window` from now.
    pub fn after(window: Duration) -> Self {
        Self {
            at: Instant::now() + window,
            window,
        }
    }
}

/// Run-wide state shared by every step of one execution.
#[derive(Debug, Clone, Default)]
pub struct StepScope {
    pub context: Arc<ExecutionContext>,
    /// Workflow-level environment, overlaid by each step's own
    pub environment: Arc<HashMap<String, String>>,
    /// Workflow deadline, if the workflow has a timeout
    pub deadline: Option<Deadline>,
}

impl StepScope {
    fn deadline_passed(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline.at)
            .unwrap_or(false)
    }

    /// `instant`, pulled in to the workflow deadline when that comes first.
    fn clamp(&self, instant: Instant) -> Instant {
        match self.deadline {
            Some(deadline) => instant.min(deadline.at),
            None => instant,
        }
    }
}

/// Returns true when every condition holds.
pub fn evaluate_conditions(conditions: &[StepCondition], context: &ExecutionContext) -> bool {
    conditions.iter().all(|c| evaluate_condition(c, context))
}

fn evaluate_condition(condition: &StepCondition, context: &ExecutionContext) -> bool {
    match condition.condition_type.as_str() {
        "variable" => context
            .variable_text(&condition.field)
            .map(|value| value == condition.value)
            .unwrap_or(false),
        "environment" => context
            .environment
            .get(&condition.field)
            .map(|value| value == &condition.value)
            .unwrap_or(false),
        other => {
            debug!("Condition type '{}' is not evaluated; treating as met", other);
            true
        }
    }
}

fn earliest(a: Option<Deadline>, b: Option<Deadline>) -> Option<Deadline> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.at < a.at { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// Executes steps against a command runner.
#[derive(Clone)]
pub struct StepExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl StepExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Runs `step` to a final result.
    ///
    /// The result is `skipped` when a condition does not hold, otherwise
    /// `completed` on the first successful attempt or `failed` with the
    /// last error once attempts run out. No attempt starts after the
    /// workflow deadline.
    pub async fn execute(&self, step: &WorkflowStep, scope: &StepScope) -> StepResult {
        let started = Instant::now();
        let mut result = StepResult::started(step);

        info!("▶ Executing step: {}", step.name);

        if !evaluate_conditions(&step.conditions, &scope.context) {
            info!("⏭ Step skipped: {} (conditions not met)", step.name);
            result.status = StepStatus::Skipped;
            finish(&mut result, started);
            return result;
        }

        let max_attempts = step.max_attempts();
        for attempt in 0..max_attempts {
            if attempt > 0 {
                if scope.deadline_passed() {
                    warn!("Step '{}': workflow deadline passed, not retrying", step.name);
                    break;
                }

                sleep_until(scope.clamp(Instant::now() + RETRY_BACKOFF * attempt)).await;
                if scope.deadline_passed() {
                    warn!("Step '{}': workflow deadline passed during backoff", step.name);
                    break;
                }

                info!(
                    "Retrying step: {} (attempt {}/{})",
                    step.name,
                    attempt + 1,
                    max_attempts
                );
            }

            match self.attempt(step, scope).await {
                Ok(output) => {
                    result.status = StepStatus::Completed;
                    result.output = output;
                    result.error.clear();
                    finish(&mut result, started);
                    info!("✓ Step completed: {}", step.name);
                    return result;
                }
                Err(e) => {
                    debug!("Step '{}' attempt {} failed: {}", step.name, attempt + 1, e);
                    result.retry_count = attempt + 1;
                    result.error = e.to_string();
                }
            }
        }

        result.status = StepStatus::Failed;
        finish(&mut result, started);
        error!("✗ Step failed: {}: {}", step.name, result.error);
        result
    }

    async fn attempt(&self, step: &WorkflowStep, scope: &StepScope) -> Result<String, StepError> {
        let kind: StepKind = step.step_type.parse()?;

        if let Some(output) = kind.placeholder_output() {
            warn!(
                "Step '{}': {} steps are not carried out; reporting success",
                step.name, step.step_type
            );
            return Ok(output.to_string());
        }

        self.run_command(step, scope).await
    }

    async fn run_command(&self, step: &WorkflowStep, scope: &StepScope) -> Result<String, StepError> {
        let mut environment = (*scope.environment).clone();
        environment.extend(step.environment.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut invocation = Invocation::new(&step.command, step.args.iter().cloned())
            .with_env(environment)
            .captured();
        if !step.working_dir.is_empty() {
            invocation = invocation.in_dir(&step.working_dir);
        }

        let step_timeout = step.timeout_duration().unwrap_or_else(|e| {
            warn!("Step '{}': ignoring timeout '{}': {}", step.name, step.timeout, e);
            None
        });

        let Some(deadline) = earliest(step_timeout.map(Deadline::after), scope.deadline) else {
            return Ok(self.runner.execute(&invocation).await?);
        };

        match timeout_at(deadline.at, self.runner.execute(&invocation)).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(RunnerError::Cancelled {
                name: invocation.name.clone(),
                dir: invocation.dir.clone(),
                timeout: deadline.window,
            }
            .into()),
        }
    }
}

fn finish(result: &mut StepResult, started: Instant) {
    result.end_time = Some(Utc::now());
    result.duration = started.elapsed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::MockRunner;
    use serde_json::Value;

    fn scope_with(variables: &[(&str, Value)], environment: &[(&str, &str)]) -> StepScope {
        let mut context = ExecutionContext::default();
        for (k, v) in variables {
            context.variables.insert(k.to_string(), v.clone());
        }
        for (k, v) in environment {
            context.environment.insert(k.to_string(), v.to_string());
        }
        StepScope {
            context: Arc::new(context),
            ..StepScope::default()
        }
    }

    #[test]
    fn test_conditions_all_must_hold() {
        let scope = scope_with(&[("env", Value::from("prod")), ("n", Value::from(3))], &[("CI", "true")]);

        assert!(evaluate_conditions(&[], &scope.context));
        assert!(evaluate_conditions(
            &[
                StepCondition::variable("env", "prod"),
                StepCondition::variable("n", "3"),
                StepCondition::environment("CI", "true"),
            ],
            &scope.context
        ));
        assert!(!evaluate_conditions(
            &[StepCondition::variable("env", "prod"), StepCondition::environment("CI", "false")],
            &scope.context
        ));
        assert!(!evaluate_conditions(&[StepCondition::variable("missing", "x")], &scope.context));
    }

    #[test]
    fn test_unknown_condition_type_holds() {
        let condition = StepCondition {
            condition_type: "file_exists".to_string(),
            field: "go.mod".to_string(),
            value: String::new(),
        };
        assert!(evaluate_conditions(&[condition], &ExecutionContext::default()));
    }

    #[test]
    fn test_step_kind_parse() {
        assert_eq!("shell".parse::<StepKind>().unwrap(), StepKind::Shell);
        assert_eq!("notification".parse::<StepKind>().unwrap(), StepKind::Notification);
        let err = "ftp".parse::<StepKind>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported step type: ftp");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_variable_skips_step() {
        let runner = Arc::new(MockRunner::new());
        let executor = StepExecutor::new(runner.clone());
        let step = WorkflowStep::new("deploy", "shell", "kubectl")
            .with_condition(StepCondition::variable("target", "prod"));

        let result = executor.execute(&step, &StepScope::default()).await;

        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(result.retry_count, 0);
        assert!(result.end_time.is_some());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shell_step_runs_through_runner() {
        let runner = Arc::new(MockRunner::new().with_output("go", "ok  ./..."));
        let executor = StepExecutor::new(runner.clone());

        let mut environment = HashMap::new();
        environment.insert("GOFLAGS".to_string(), "-mod=mod".to_string());
        environment.insert("CGO_ENABLED".to_string(), "1".to_string());
        let scope = StepScope {
            environment: Arc::new(environment),
            ..StepScope::default()
        };

        let step = WorkflowStep::new("test", "shell", "go")
            .with_args(["test", "./..."])
            .with_working_dir("/src/app")
            .with_env("CGO_ENABLED", "0");

        let result = executor.execute(&step, &scope).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.output, "ok  ./...");
        assert!(result.error.is_empty());

        let calls = runner.calls_to("go");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["test", "./..."]);
        assert!(calls[0].capture_output);
        assert_eq!(calls[0].dir.as_deref(), Some(std::path::Path::new("/src/app")));
        assert_eq!(calls[0].env["CGO_ENABLED"], "0");
        assert_eq!(calls[0].env["GOFLAGS"], "-mod=mod");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_step_retries_with_linear_backoff() {
        let runner = Arc::new(MockRunner::new().with_failure("flaky"));
        let executor = StepExecutor::new(runner.clone());
        let step = WorkflowStep::new("flaky", "command", "flaky").with_retries(3);

        let started = Instant::now();
        let result = executor.execute(&step, &StepScope::default()).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.retry_count, 3);
        assert!(result.error.contains("flaky failed"));
        assert_eq!(runner.calls_to("flaky").len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(result.duration >= Duration::from_secs(3));

        let calls = runner.calls();
        assert!(calls[1].started - calls[0].started >= Duration::from_secs(1));
        assert!(calls[2].started - calls[1].started >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_count_makes_one_attempt() {
        let runner = Arc::new(MockRunner::new().with_failure("false"));
        let executor = StepExecutor::new(runner.clone());
        let step = WorkflowStep::new("once", "shell", "false");

        let result = executor.execute(&step, &StepScope::default()).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.retry_count, 1);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_kinds_report_canned_output() {
        let runner = Arc::new(MockRunner::new());
        let executor = StepExecutor::new(runner.clone());

        for (kind, expected) in [
            ("script", "Script executed successfully"),
            ("http", "HTTP request completed"),
            ("notification", "Notification sent"),
        ] {
            let step = WorkflowStep::new(kind, kind, "ignored");
            let result = executor.execute(&step, &StepScope::default()).await;
            assert_eq!(result.status, StepStatus::Completed);
            assert_eq!(result.output, expected);
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_type_fails() {
        let executor = StepExecutor::new(Arc::new(MockRunner::new()));
        let step = WorkflowStep::new("odd", "ftp", "put");

        let result = executor.execute(&step, &StepScope::default()).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error, "unsupported step type: ftp");
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_cancels_command() {
        let runner = Arc::new(MockRunner::new().with_delay("sleepy", Duration::from_secs(60)));
        let executor = StepExecutor::new(runner);
        let step = WorkflowStep::new("nap", "shell", "sleepy").with_timeout("5s");

        let started = Instant::now();
        let result = executor.execute(&step, &StepScope::default()).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error, "command 'sleepy' was canceled after 5s");
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries_after_workflow_deadline() {
        let runner = Arc::new(MockRunner::new().with_delay("slow", Duration::from_secs(30)));
        let executor = StepExecutor::new(runner.clone());
        let step = WorkflowStep::new("slow", "shell", "slow").with_retries(5);
        let scope = StepScope {
            deadline: Some(Deadline::after(Duration::from_secs(10))),
            ..StepScope::default()
        };

        let result = executor.execute(&step, &scope).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.retry_count, 1);
        assert_eq!(runner.calls().len(), 1);
        assert!(result.error.contains("canceled after 10s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_stops_at_workflow_deadline() {
        let runner = Arc::new(MockRunner::new().with_failure("flaky"));
        let executor = StepExecutor::new(runner.clone());
        let step = WorkflowStep::new("flaky", "shell", "flaky").with_retries(20);
        let scope = StepScope {
            deadline: Some(Deadline::after(Duration::from_secs(11))),
            ..StepScope::default()
        };

        let started = Instant::now();
        let result = executor.execute(&step, &scope).await;

        // Attempts at 0s, 1s, 3s, 6s and 10s; the next backoff would end at 15s
        let calls = runner.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(result.retry_count, 5);
        assert_eq!(result.status, StepStatus::Failed);
        assert!(calls.iter().all(|c| c.started - started < Duration::from_secs(11)));
        assert!(started.elapsed() >= Duration::from_secs(11));
        assert!(started.elapsed() < Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_reports_winning_timeout() {
        let runner = Arc::new(MockRunner::new().with_delay("sleepy", Duration::from_secs(60)));
        let executor = StepExecutor::new(runner.clone());
        let step = WorkflowStep::new("nap", "shell", "sleepy")
            .with_timeout("5s")
            .with_retries(3);
        let scope = StepScope {
            deadline: Some(Deadline::after(Duration::from_secs(8))),
            ..StepScope::default()
        };

        let result = executor.execute(&step, &scope).await;

        // First attempt hits the step timeout; the retry at 6s hits the workflow deadline
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(result.retry_count, 2);
        assert_eq!(result.error, "command 'sleepy' was canceled after 8s");
    }
}
