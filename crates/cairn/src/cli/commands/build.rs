//! Build command - execute stale tasks

use std::path::Path;

use clap::Args;
use console::style;
use tracing::{info, warn};

use cairn_core::Config;
use cairn_tasks::{
    tasks_from_config, Outcome, RunResult, Session, SessionOptions, TaskEvent, TaskReporter,
    TaskReporterRegistry,
};

use super::load_project;
use crate::cli::output::{self, plural, task_style};
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Execute stale tasks
#[derive(Debug, Args)]
pub struct BuildCommand {
    /// Execute every task regardless of recorded state
    #[arg(long)]
    pub force: bool,

    /// Show which tasks would run without executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Stop scheduling new tasks after this many failures
    #[arg(long, value_name = "N")]
    pub max_failures: Option<usize>,

    /// Maximum concurrent tasks
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,
}

impl BuildCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<i32> {
        info!("executing build command");
        let (config, root) = load_project()?;
        let options = self.session_options(&config, &root);
        let text = cli.format == OutputFormat::Text;

        let tasks = tasks_from_config(&config, &root);
        if tasks.is_empty() {
            if text && !cli.quiet {
                output::info("No tasks configured.");
            }
            return Ok(exit_codes::SUCCESS);
        }

        if text && !cli.quiet {
            output::info(&format!("{} in {}", plural(tasks.len(), "task"), root.display()));
            if options.dry_run {
                println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
            }
            println!();
        }

        let mut reporters = TaskReporterRegistry::new();
        if text && !cli.quiet {
            reporters.register(ConsoleReporter::new(cli.verbose));
        }
        let session = Session::new(options, reporters);

        let cancel = session.cancel_handle();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, waiting for running tasks to finish");
                cancel.cancel();
            }
        });
        let result = session.run(tasks).await;
        interrupt.abort();
        let result = result?;

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "status": result.status,
                    "cancelled": result.cancelled,
                    "resolution_error": result.resolution_error.as_ref().map(|e| e.to_string()),
                    "summary": result.summary,
                    "tasks": result.reports,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => print_problems(&result),
        }

        Ok(exit_codes::for_run(&result))
    }

    /// Configured session options with command-line overrides applied
    fn session_options(&self, config: &Config, root: &Path) -> SessionOptions {
        let mut options = SessionOptions::from_config(config, root);
        options.force |= self.force;
        options.dry_run |= self.dry_run;
        if let Some(max_failures) = self.max_failures {
            options.max_failures = Some(max_failures);
        }
        if let Some(jobs) = self.jobs {
            options.concurrency = jobs.max(1);
        }
        options
    }
}

/// Errors are printed even with `--quiet`
fn print_problems(result: &RunResult) {
    if let Some(error) = &result.resolution_error {
        output::error(&error.to_string());
        return;
    }

    if let Some(error) = result.execution_error() {
        eprintln!();
        output::error(&format!(
            "{}/{} failed:",
            plural(error.failures.len(), "task"),
            result.reports.len()
        ));
        for failure in &error.failures {
            eprintln!(
                "    {} {}: {}",
                style("✗").red(),
                failure.id,
                failure.message.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if result.cancelled {
        output::warning("Build cancelled; unfinished tasks will run next time.");
    }
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn finished(&self, id: &str, outcome: Outcome, message: Option<&str>, seconds: f64) {
        let elapsed = style(format!("{:.1}s", seconds)).dim();
        let note = |text: &str| style(format!("({})", text)).dim();

        match outcome {
            Outcome::Success => {
                println!("  {} {} {}", style("✓").green(), style(id).green(), elapsed);
            }
            Outcome::Fail => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(id).red(),
                    elapsed,
                    style(message.unwrap_or("unknown error")).red().dim()
                );
            }
            Outcome::SkippedUnchanged => {
                if self.verbose {
                    println!("  {} {} {}", style("·").dim(), style(id).dim(), note("unchanged"));
                }
            }
            Outcome::Persisted => {
                println!("  {} {} {}", style("✓").cyan(), style(id).cyan(), note("persisted"));
            }
            Outcome::Skip | Outcome::SkippedAncestorFailed => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(id).yellow(),
                    note(message.unwrap_or(outcome.as_str()))
                );
            }
            Outcome::WouldBeExecuted => {
                println!("  {} {} {}", style("→").blue(), task_style().apply_to(id), note("would run"));
            }
            Outcome::Cancelled => {
                println!("  {} {} {}", style("-").dim(), style(id).dim(), note("cancelled"));
            }
        }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::ExecutionStarted { id } => {
                if self.verbose {
                    println!("  {} {}", style("▸").dim(), task_style().apply_to(id));
                }
            }
            TaskEvent::ExecutionFinished {
                id,
                outcome,
                message,
                duration,
            } => {
                self.finished(id.as_str(), *outcome, message.as_deref(), duration.as_secs_f64());
            }
            TaskEvent::ResolutionError { id: Some(id), message } => {
                println!("  {} {} {}", style("✗").red(), style(id).red(), style(message).red().dim());
            }
            TaskEvent::Warning { message } => output::warning(message),
            TaskEvent::RunFinished { status: _, summary } => {
                if summary.total == 0 {
                    return;
                }
                let mut extra = Vec::new();
                if summary.skipped + summary.skipped_ancestor_failed > 0 {
                    extra.push(format!("{} skipped", summary.skipped + summary.skipped_ancestor_failed));
                }
                if summary.would_be_executed > 0 {
                    extra.push(format!("{} would run", summary.would_be_executed));
                }
                if summary.cancelled > 0 {
                    extra.push(format!("{} cancelled", summary.cancelled));
                }
                let extra: String = extra.iter().map(|e| format!(", {}", e)).collect();

                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} unchanged{} ({:.1}s)",
                    if summary.failed == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    summary.succeeded + summary.persisted,
                    summary.total,
                    summary.failed,
                    summary.unchanged,
                    extra,
                    summary.duration.as_secs_f64()
                );
            }
            TaskEvent::Collected { .. } | TaskEvent::ResolutionError { id: None, .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> BuildCommand {
        BuildCommand {
            force: false,
            dry_run: false,
            max_failures: None,
            jobs: None,
        }
    }

    #[test]
    fn test_session_options_from_config() {
        let mut config = Config::default();
        config.engine.concurrency = 3;
        config.engine.max_failures = Some(5);

        let options = command().session_options(&config, Path::new("/proj"));
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.max_failures, Some(5));
        assert!(!options.force);
        assert!(!options.dry_run);
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        config.engine.max_failures = Some(5);
        let cmd = BuildCommand {
            force: true,
            dry_run: true,
            max_failures: Some(1),
            jobs: Some(0),
        };

        let options = cmd.session_options(&config, Path::new("/proj"));
        assert!(options.force);
        assert!(options.dry_run);
        assert_eq!(options.max_failures, Some(1));
        assert_eq!(options.concurrency, 1);
    }

    #[test]
    fn test_console_reporter_handles_every_event() {
        let reporter = ConsoleReporter::new(true);
        for outcome in [
            Outcome::Success,
            Outcome::Fail,
            Outcome::Skip,
            Outcome::SkippedAncestorFailed,
            Outcome::SkippedUnchanged,
            Outcome::Persisted,
            Outcome::WouldBeExecuted,
            Outcome::Cancelled,
        ] {
            reporter.finished("task", outcome, None, 0.5);
        }
        reporter.report(&TaskEvent::Warning {
            message: "lockfile discarded".to_string(),
        });
    }
}
