//! Scheduled Workflows
//!
//! Bookkeeping for workflows registered to run periodically. Each workflow
//! has at most one schedule, identified as `sched-<workflow>`. Only the
//! schedule records are managed here; nothing fires them.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::duration::parse_duration;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule expression is empty")]
    Empty,

    #[error("invalid schedule expression '{0}': expected 5 cron fields or an @ macro")]
    Invalid(String),
}

/// A workflow registered for periodic execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScheduledWorkflow {
    pub id: String,
    pub workflow_name: String,
    /// Cron expression or macro such as `@daily` / `@every 30m`
    pub schedule: String,
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,

    #[serde(default)]
    pub run_count: u32,
}

impl ScheduledWorkflow {
    pub fn new(workflow_name: impl Into<String>, schedule: impl Into<String>) -> Self {
        let workflow_name = workflow_name.into();
        let schedule = schedule.into();
        Self {
            id: schedule_id(&workflow_name),
            next_run: next_run_after(&schedule, Utc::now()),
            workflow_name,
            schedule,
            enabled: true,
            last_run: None,
            run_count: 0,
        }
    }

    /// Replaces the expression and recomputes the next run.
    pub fn reschedule(&mut self, schedule: impl Into<String>) {
        self.schedule = schedule.into();
        self.next_run = next_run_after(&self.schedule, Utc::now());
        self.enabled = true;
    }
}

pub fn schedule_id(workflow_name: &str) -> String {
    format!("sched-{}", workflow_name)
}

/// Checks that `expression` is a 5-field cron line or a known macro.
pub fn validate_expression(expression: &str) -> Result<(), ScheduleError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ScheduleError::Empty);
    }

    if let Some(interval) = expression.strip_prefix("@every ") {
        return parse_duration(interval.trim())
            .map(|_| ())
            .map_err(|_| ScheduleError::Invalid(expression.to_string()));
    }

    if expression.starts_with('@') {
        return match macro_interval(expression) {
            Some(_) => Ok(()),
            None => Err(ScheduleError::Invalid(expression.to_string())),
        };
    }

    if expression.split_whitespace().count() == 5 {
        Ok(())
    } else {
        Err(ScheduleError::Invalid(expression.to_string()))
    }
}

fn macro_interval(expression: &str) -> Option<ChronoDuration> {
    match expression {
        "@hourly" => Some(ChronoDuration::hours(1)),
        "@daily" | "@midnight" => Some(ChronoDuration::days(1)),
        "@weekly" => Some(ChronoDuration::weeks(1)),
        "@monthly" => Some(ChronoDuration::days(30)),
        "@yearly" | "@annually" => Some(ChronoDuration::days(365)),
        _ => None,
    }
}

/// Next run for interval expressions; cron lines have no computed time.
fn next_run_after(expression: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expression = expression.trim();
    let interval = match expression.strip_prefix("@every ") {
        Some(interval) => {
            let interval = parse_duration(interval.trim()).ok()?;
            ChronoDuration::from_std(interval).ok()?
        }
        None => macro_interval(expression)?,
    };
    Some(from + interval)
}

/// The set of scheduled workflows, keyed by workflow name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleBook {
    entries: Vec<ScheduledWorkflow>,
}

impl ScheduleBook {
    pub fn new(entries: Vec<ScheduledWorkflow>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ScheduledWorkflow] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ScheduledWorkflow> {
        self.entries
    }

    pub fn get(&self, workflow_name: &str) -> Option<&ScheduledWorkflow> {
        self.entries.iter().find(|e| e.workflow_name == workflow_name)
    }

    /// Adds a schedule, replacing any existing one for the same workflow.
    pub fn add(&mut self, workflow_name: &str, expression: &str) -> Result<&ScheduledWorkflow, ScheduleError> {
        validate_expression(expression)?;

        let entry = ScheduledWorkflow::new(workflow_name, expression.trim());
        match self.entries.iter().position(|e| e.workflow_name == workflow_name) {
            Some(index) => {
                debug!("Replacing schedule for '{}'", workflow_name);
                self.entries[index] = entry;
                Ok(&self.entries[index])
            }
            None => {
                info!("Scheduling '{}' with '{}'", workflow_name, expression.trim());
                self.entries.push(entry);
                Ok(&self.entries[self.entries.len() - 1])
            }
        }
    }

    /// Changes the expression of an existing schedule.
    ///
    /// Returns `Ok(None)` when the workflow has no schedule.
    pub fn update(
        &mut self,
        workflow_name: &str,
        expression: &str,
    ) -> Result<Option<&ScheduledWorkflow>, ScheduleError> {
        validate_expression(expression)?;

        match self.entries.iter_mut().find(|e| e.workflow_name == workflow_name) {
            Some(entry) => {
                entry.reschedule(expression.trim());
                Ok(Some(&*entry))
            }
            None => Ok(None),
        }
    }

    /// Removes a workflow's schedule. Returns false if there was none.
    pub fn remove(&mut self, workflow_name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.workflow_name != workflow_name);
        self.entries.len() != before
    }
}
