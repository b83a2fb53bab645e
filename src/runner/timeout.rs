//! Adaptive Command Timeouts
//!
//! Every external command runs under a deadline derived from what the
//! command is. Long-running tools (linters, release builders, test
//! suites) get generous windows while unknown commands get a short one.

use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::workflow::duration::parse_duration;

/// Timeout for commands with no specific policy.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time granted on top of an explicit `golangci-lint --timeout`.
pub const LINT_TIMEOUT_BUFFER: Duration = Duration::from_secs(5 * 60);

const LINT_DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const GO_TEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const GO_MODULE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const GO_BUILD_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const GO_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
const GO_DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const MAGE_TEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const MAGE_DEFAULT_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const RELEASE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const ANALYZER_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Derives the timeout for running `name` with `args`.
///
/// The result depends only on the command's file name and its leading
/// arguments.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use magex::runner::command_timeout;
///
/// let args = vec!["run".to_string(), "--timeout".to_string(), "5m".to_string()];
/// assert_eq!(command_timeout("golangci-lint", &args), Duration::from_secs(600));
/// assert_eq!(command_timeout("ls", &[]), Duration::from_secs(30));
/// ```
pub fn command_timeout(name: &str, args: &[String]) -> Duration {
    let program = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    let subcommand = args.first().map(String::as_str);

    match program {
        "golangci-lint" => lint_timeout(args),
        "go" => match subcommand {
            Some("test") => GO_TEST_TIMEOUT,
            Some("install" | "get" | "mod") => GO_MODULE_TIMEOUT,
            Some("build" | "run") => GO_BUILD_TIMEOUT,
            Some("vet" | "list") => GO_QUERY_TIMEOUT,
            _ => GO_DEFAULT_TIMEOUT,
        },
        "mage" => match subcommand {
            Some(target) if target == "test" || target.starts_with("test:") => MAGE_TEST_TIMEOUT,
            _ => MAGE_DEFAULT_TIMEOUT,
        },
        "goreleaser" => RELEASE_TIMEOUT,
        "staticcheck" | "gosec" | "govulncheck" => ANALYZER_TIMEOUT,
        _ => DEFAULT_TIMEOUT,
    }
}

/// Honors an explicit `--timeout` on the lint command plus a buffer so the
/// linter can report its own timeout before it is killed.
fn lint_timeout(args: &[String]) -> Duration {
    match configured_lint_timeout(args) {
        Some(configured) => configured + LINT_TIMEOUT_BUFFER,
        None => LINT_DEFAULT_TIMEOUT,
    }
}

fn configured_lint_timeout(args: &[String]) -> Option<Duration> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = if arg == "--timeout" {
            iter.next().map(String::as_str)
        } else {
            arg.strip_prefix("--timeout=")
        };

        if let Some(value) = value {
            return match parse_duration(value) {
                Ok(duration) => Some(duration),
                Err(e) => {
                    debug!("Ignoring golangci-lint timeout '{}': {}", value, e);
                    None
                }
            };
        }
    }
    None
}
