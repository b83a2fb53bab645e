//! Subprocess Execution
//!
//! [`ProcessRunner`] spawns real processes with `tokio::process`, bounded
//! by the adaptive timeout for each command. Children are killed when
//! their future is dropped, so an outer deadline that abandons a command
//! also stops the process.

use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use super::{CommandRunner, Invocation, RunnerError};

/// Runs commands as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    verbose: bool,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs every command line at info level instead of debug.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn build_command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.name);
        cmd.args(&invocation.args);
        cmd.envs(&invocation.env);
        cmd.kill_on_drop(true);

        if let Some(dir) = &invocation.dir {
            cmd.current_dir(dir);
        }

        if invocation.capture_output {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        }
        cmd.stdin(Stdio::null());

        cmd
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(&self, invocation: &Invocation) -> Result<String, RunnerError> {
        let timeout = invocation.timeout();
        let command_line = invocation.command_line();

        match &invocation.dir {
            Some(dir) if self.verbose => info!("➤ [{}] {}", dir.display(), command_line),
            None if self.verbose => info!("➤ {}", command_line),
            Some(dir) => debug!("Running in {}: {} (timeout {:?})", dir.display(), command_line, timeout),
            None => debug!("Running: {} (timeout {:?})", command_line, timeout),
        }

        let child = Self::build_command(invocation)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                name: invocation.name.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| RunnerError::Io {
                name: invocation.name.clone(),
                source,
            })?,
            Err(_) => {
                return Err(RunnerError::Timeout {
                    name: invocation.name.clone(),
                    dir: invocation.dir.clone(),
                    timeout,
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(RunnerError::Failed {
                command: command_line,
                dir: invocation.dir.clone(),
                code: output.status.code(),
                output: combined,
            });
        }

        Ok(combined.trim_end().to_string())
    }
}

/// Logs commands instead of running them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunRunner;

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn execute(&self, invocation: &Invocation) -> Result<String, RunnerError> {
        match &invocation.dir {
            Some(dir) => info!(
                "[DRY RUN] Would execute in {}: {}",
                dir.display(),
                invocation.command_line()
            ),
            None => info!("[DRY RUN] Would execute: {}", invocation.command_line()),
        }
        Ok(String::new())
    }
}
