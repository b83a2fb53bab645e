//! Command Runner Module
//!
//! Every external tool invocation (`go`, `git`, `golangci-lint`, ...) goes
//! through a [`CommandRunner`]. Implementations only provide
//! [`CommandRunner::execute`]; the convenience methods are built on it.
//!
//! # Architecture
//!
//! - [`timeout`]: per-command timeout policy
//! - [`process`]: real subprocess execution and the dry-run runner
//!
//! A process-wide runner is available through [`global`] and can be
//! replaced with [`set_global`]. Long-lived components such as the
//! workflow engine take their runner explicitly instead.

pub mod process;
pub mod timeout;

#[cfg(test)]
pub(crate) mod mock;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::workflow::duration::format_duration;

pub use process::{DryRunRunner, ProcessRunner};
pub use timeout::command_timeout;

/// Errors produced while running an external command.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}'{} failed with {}{}", in_dir(.dir), exit_text(.code), output_suffix(.output))]
    Failed {
        command: String,
        dir: Option<PathBuf>,
        code: Option<i32>,
        output: String,
    },

    #[error("command '{name}'{} exceeded timeout of {}", in_dir(.dir), timeout_text(.timeout))]
    Timeout {
        name: String,
        dir: Option<PathBuf>,
        timeout: Duration,
    },

    #[error("command '{name}'{} was canceled after {}", in_dir(.dir), timeout_text(.timeout))]
    Cancelled {
        name: String,
        dir: Option<PathBuf>,
        timeout: Duration,
    },

    #[error("i/o error while running '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    /// True when the command was stopped by a deadline rather than failing
    /// on its own.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { code, .. } => *code,
            _ => None,
        }
    }
}

fn in_dir(dir: &Option<PathBuf>) -> String {
    match dir {
        Some(dir) => format!(" in '{}'", dir.display()),
        None => String::new(),
    }
}

fn exit_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn timeout_text(timeout: &Duration) -> String {
    format_duration(*timeout)
}

fn output_suffix(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// A fully described command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<String>,
    /// Working directory; the process-wide directory is never changed
    pub dir: Option<PathBuf>,
    /// Extra environment on top of the inherited one
    pub env: HashMap<String, String>,
    /// Capture combined output instead of streaming it to the terminal
    pub capture_output: bool,
}

impl Invocation {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn captured(mut self) -> Self {
        self.capture_output = true;
        self
    }

    /// Timeout this invocation runs under.
    pub fn timeout(&self) -> Duration {
        command_timeout(&self.name, &self.args)
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.args.join(" "))
        }
    }
}

/// Executes external commands.
///
/// Implementations are shared across concurrently running steps and must
/// not rely on process-wide state such as the current directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs an invocation to completion.
    ///
    /// Returns captured output (trailing whitespace trimmed) when
    /// `capture_output` is set, otherwise an empty string.
    async fn execute(&self, invocation: &Invocation) -> Result<String, RunnerError>;

    /// Runs a command, streaming its output to the terminal.
    async fn run_cmd(&self, name: &str, args: &[String]) -> Result<(), RunnerError> {
        self.execute(&Invocation::new(name, args.iter().cloned()))
            .await
            .map(|_| ())
    }

    /// Runs a command and returns its combined output.
    async fn run_cmd_output(&self, name: &str, args: &[String]) -> Result<String, RunnerError> {
        self.execute(&Invocation::new(name, args.iter().cloned()).captured())
            .await
    }

    /// Runs a command in `dir`.
    async fn run_cmd_in_dir(
        &self,
        dir: &Path,
        name: &str,
        args: &[String],
    ) -> Result<(), RunnerError> {
        self.execute(&Invocation::new(name, args.iter().cloned()).in_dir(dir))
            .await
            .map(|_| ())
    }

    /// Runs a command in `dir` and returns its combined output.
    async fn run_cmd_output_in_dir(
        &self,
        dir: &Path,
        name: &str,
        args: &[String],
    ) -> Result<String, RunnerError> {
        self.execute(&Invocation::new(name, args.iter().cloned()).in_dir(dir).captured())
            .await
    }
}

/// Process-wide runner slot.
static GLOBAL_RUNNER: Lazy<RwLock<Arc<dyn CommandRunner>>> = Lazy::new(|| {
    debug!("Initializing default command runner");
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    RwLock::new(runner)
});

/// Returns the process-wide runner, creating the default one on first use.
pub fn global() -> Arc<dyn CommandRunner> {
    let slot = GLOBAL_RUNNER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(&*slot)
}

/// Replaces the process-wide runner.
///
/// Only later calls to [`global`] observe the new runner; components that
/// already hold a runner keep using theirs.
pub fn set_global(runner: Arc<dyn CommandRunner>) {
    let mut slot = GLOBAL_RUNNER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = runner;
}
