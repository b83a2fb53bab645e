//! magex-workflow CLI Entry Point
//!
//! Provides the command-line interface for the workflow operations.
//! Operation parameters are read from environment variables.
//!
//! # Usage
//!
//! ```bash
//! # Run a workflow
//! WORKFLOW=ci magex-workflow execute
//!
//! # Create a workflow from the CI template
//! WORKFLOW_NAME=pipeline TEMPLATE=ci magex-workflow create
//!
//! # Preview the commands a workflow would run
//! WORKFLOW=ci magex-workflow execute --dry-run
//!
//! # Show the five most recent runs of one workflow
//! WORKFLOW=ci LIMIT=5 magex-workflow history
//!
//! # Schedule a workflow
//! SCHEDULE_OPERATION=add WORKFLOW=ci SCHEDULE="0 2 * * *" magex-workflow schedule
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info};

use magex::runner::{self, DryRunRunner, ProcessRunner};
use magex::tasks::{ScheduleOutcome, TaskEnv, TemplateOutcome, WorkflowTasks};
use magex::workflow::duration::{format_duration, round_to_secs};
use magex::workflow::store::DEFAULT_ROOT;
use magex::workflow::{ExecutionStatus, StepStatus, WorkflowExecution, WorkflowStore};
use magex::{APP_NAME, VERSION};

/// Workflow operation selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Execute,
    List,
    Status,
    Create,
    Validate,
    Schedule,
    Template,
    History,
}

impl Command {
    /// Accepts both `execute` and `workflow:execute`.
    fn parse(arg: &str) -> Option<Self> {
        let name = arg.strip_prefix("workflow:").unwrap_or(arg);
        let command = match name {
            "execute" => Self::Execute,
            "list" => Self::List,
            "status" => Self::Status,
            "create" => Self::Create,
            "validate" => Self::Validate,
            "schedule" => Self::Schedule,
            "template" => Self::Template,
            "history" => Self::History,
            _ => return None,
        };
        Some(command)
    }
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Option<Command>,
    store_dir: PathBuf,
    dry_run: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            store_dir: PathBuf::from(DEFAULT_ROOT),
            dry_run: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: magex-workflow <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  execute     Run WORKFLOW");
    println!("  list        List stored workflows");
    println!("  status      Show EXECUTION_ID, or all executions");
    println!("  create      Create WORKFLOW_NAME from TEMPLATE (default: basic)");
    println!("  validate    Validate WORKFLOW, or all workflows");
    println!("  schedule    SCHEDULE_OPERATION: list | add | remove | update");
    println!("  template    TEMPLATE_OPERATION: list | create | update | delete");
    println!("  history     Recent executions (WORKFLOW filter, LIMIT default 10)");
    println!();
    println!("Options:");
    println!("  --dir PATH  Store directory (default: {})", DEFAULT_ROOT);
    println!("  --dry-run   Log commands instead of running them");
    println!("  --verbose   Enable debug logging");
    println!("  --help      Show this help message");
    println!("  --version   Show version information");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => {
                config.dry_run = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("--dir requires a path argument".to_string());
                }
                config.store_dir = PathBuf::from(&args[i]);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            other => {
                if config.command.is_some() {
                    return Err(format!("Unexpected argument: {}", other));
                }
                let command =
                    Command::parse(other).ok_or_else(|| format!("Unknown command: {}", other))?;
                config.command = Some(command);
            }
        }
        i += 1;
    }

    if config.command.is_none() {
        return Err("No command given".to_string());
    }
    Ok(config)
}

fn status_label(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Completed => status.as_str().green().to_string(),
        ExecutionStatus::Failed => status.as_str().red().to_string(),
        ExecutionStatus::Running => status.as_str().yellow().to_string(),
    }
}

fn step_label(status: StepStatus) -> String {
    match status {
        StepStatus::Completed => "✓".green().to_string(),
        StepStatus::Failed => "✗".red().to_string(),
        StepStatus::Skipped => "⏭".yellow().to_string(),
        StepStatus::Running => "▶".cyan().to_string(),
        StepStatus::Pending => "·".dimmed().to_string(),
    }
}

fn elapsed(execution: &WorkflowExecution) -> String {
    execution
        .duration()
        .map(|d| format_duration(round_to_secs(d)))
        .unwrap_or_else(|| "-".to_string())
}

fn print_execution_row(execution: &WorkflowExecution) {
    println!(
        "  {:<32} {:<20} {:<10} {:>8}  {}",
        execution.id,
        execution.workflow.name,
        status_label(execution.status),
        elapsed(execution),
        execution.start_time.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_execution_detail(execution: &WorkflowExecution) {
    println!("{} {}", "Execution:".bold(), execution.id);
    println!("  Workflow: {} (v{})", execution.workflow.name, execution.workflow.version);
    println!("  Status:   {}", status_label(execution.status));
    println!("  Duration: {}", elapsed(execution));
    if !execution.error.is_empty() {
        println!("  Error:    {}", execution.error.red());
    }

    println!();
    for result in &execution.results {
        let retries = if result.retry_count > 1 {
            format!(" ({} attempts)", result.retry_count)
        } else {
            String::new()
        };
        println!(
            "  {} {:<24} {:>8}{}",
            step_label(result.status),
            result.step.name,
            format_duration(round_to_secs(result.duration)),
            retries
        );
        if !result.error.is_empty() {
            println!("      {}", result.error.red());
        }
    }
}

/// Dispatches the configured command.
async fn dispatch(command: Command, tasks: &WorkflowTasks) -> magex::Result<()> {
    let env = TaskEnv::from_process();

    match command {
        Command::Execute => match tasks.execute(&env).await {
            Ok(execution) => {
                print_execution_detail(&execution);
                println!();
                println!("{}", "Workflow completed successfully".green().bold());
            }
            Err(e) => {
                if let Some(id) = latest_execution_id(tasks, &env) {
                    info!("Details: EXECUTION_ID={} magex-workflow status", id);
                }
                return Err(e);
            }
        },
        Command::List => {
            let definitions = tasks.list()?;
            if definitions.is_empty() {
                println!("No workflows found in {}", tasks.store().workflows_dir().display());
            }
            for definition in definitions {
                println!(
                    "  {:<24} {:<8} {:>3} steps  {}",
                    definition.name.bold(),
                    definition.version,
                    definition.len(),
                    definition.description
                );
            }
        }
        Command::Status => {
            let executions = tasks.status(&env)?;
            match executions.as_slice() {
                [] => println!("No executions found"),
                [single] if env.get(TaskEnv::EXECUTION_ID).is_some() => print_execution_detail(single),
                all => all.iter().for_each(print_execution_row),
            }
        }
        Command::Create => {
            let (definition, path) = tasks.create(&env)?;
            println!(
                "{} workflow '{}' ({} steps) at {}",
                "Created".green(),
                definition.name,
                definition.len(),
                path.display()
            );
        }
        Command::Validate => {
            for report in tasks.validate(&env)? {
                println!("  {} {}", "✓".green(), report.name);
            }
        }
        Command::Schedule => match tasks.schedule(&env)? {
            ScheduleOutcome::Listed(entries) if entries.is_empty() => {
                println!("No scheduled workflows found")
            }
            ScheduleOutcome::Listed(entries) => {
                for entry in entries {
                    let next = entry
                        .next_run
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    let state = if entry.enabled { "enabled".green() } else { "disabled".dimmed() };
                    println!(
                        "  {:<24} {:<16} {:<9} next: {}  runs: {}",
                        entry.workflow_name, entry.schedule, state, next, entry.run_count
                    );
                }
            }
            ScheduleOutcome::Added(entry) => {
                println!("{} '{}' ({})", "Scheduled".green(), entry.workflow_name, entry.schedule)
            }
            ScheduleOutcome::Updated(entry) => {
                println!("{} '{}' ({})", "Rescheduled".green(), entry.workflow_name, entry.schedule)
            }
            ScheduleOutcome::Removed(name) => println!("{} schedule for '{}'", "Removed".green(), name),
        },
        Command::Template => match tasks.template(&env)? {
            TemplateOutcome::Listed(templates) => {
                for template in templates {
                    println!(
                        "  {:<16} {:<12} {}",
                        template.name.bold(),
                        template.category,
                        template.description
                    );
                }
            }
            TemplateOutcome::Created(template) => {
                println!("{} template '{}'", "Created".green(), template.name)
            }
            TemplateOutcome::Updated(template) => {
                println!("{} template '{}'", "Updated".green(), template.name)
            }
            TemplateOutcome::Deleted(name) => println!("{} template '{}'", "Deleted".green(), name),
        },
        Command::History => {
            let executions = tasks.history(&env)?;
            if executions.is_empty() {
                println!("No executions found");
            }
            executions.iter().for_each(print_execution_row);
        }
    }

    Ok(())
}

fn latest_execution_id(tasks: &WorkflowTasks, env: &TaskEnv) -> Option<String> {
    let name = env.get(TaskEnv::WORKFLOW)?;
    let query = magex::workflow::HistoryQuery {
        workflow: Some(name.to_string()),
        limit: 1,
    };
    tasks.store().history(&query).ok()?.into_iter().next().map(|e| e.id)
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    if config.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
        runner::set_global(Arc::new(DryRunRunner));
    } else if config.verbose {
        runner::set_global(Arc::new(ProcessRunner::new().verbose(true)));
    }

    let Some(command) = config.command else {
        return Err("No command given".into());
    };

    info!("Store: {}", config.store_dir.display());
    let tasks = WorkflowTasks::new(WorkflowStore::new(&config.store_dir));

    dispatch(command, &tasks).await.map_err(|e| {
        error!("{:?} failed", command);
        e
    })?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
