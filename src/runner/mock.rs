//! Scriptable runner for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CommandRunner, Invocation, RunnerError};

#[derive(Debug, Clone, Default)]
struct Script {
    output: String,
    fail: bool,
    delay: Option<Duration>,
}

/// A recorded call, with the (tokio) instant it started.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub invocation: Invocation,
    pub started: Instant,
}

impl std::ops::Deref for RecordedCall {
    type Target = Invocation;

    fn deref(&self) -> &Invocation {
        &self.invocation
    }
}

/// Records every invocation and answers from a per-command script.
///
/// Commands are keyed by name; unscripted commands succeed with empty
/// output.
#[derive(Debug, Default)]
pub struct MockRunner {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(self, name: &str, update: impl FnOnce(&mut Script)) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            update(scripts.entry(name.to_string()).or_default());
        }
        self
    }

    pub fn with_output(self, name: &str, output: &str) -> Self {
        let output = output.to_string();
        self.script(name, |s| s.output = output)
    }

    pub fn with_failure(self, name: &str) -> Self {
        self.script(name, |s| s.fail = true)
    }

    pub fn with_delay(self, name: &str, delay: Duration) -> Self {
        self.script(name, |s| s.delay = Some(delay))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, name: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.invocation.name == name)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn execute(&self, invocation: &Invocation) -> Result<String, RunnerError> {
        self.calls.lock().unwrap().push(RecordedCall {
            invocation: invocation.clone(),
            started: Instant::now(),
        });

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&invocation.name)
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        if script.fail {
            return Err(RunnerError::Failed {
                command: invocation.command_line(),
                dir: invocation.dir.clone(),
                code: Some(1),
                output: format!("{} failed", invocation.name),
            });
        }

        Ok(script.output)
    }
}
