//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{BuildCommand, CleanStateCommand, DagCommand};

/// cairn - Incremental build engine
#[derive(Debug, Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute stale tasks
    Build(BuildCommand),

    /// Show tasks in schedule order with their dependencies
    Dag(DagCommand),

    /// Remove the lockfile and its journal
    CleanState(CleanStateCommand),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub fn execute(&self) -> anyhow::Result<i32> {
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match &self.command {
            Commands::Build(cmd) => cmd.execute(self),
            Commands::Dag(cmd) => cmd.execute(self),
            Commands::CleanState(cmd) => cmd.execute(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::try_parse_from([
            "cairn",
            "--format",
            "json",
            "build",
            "--force",
            "--max-failures",
            "2",
            "-j",
            "8",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Build(cmd) => {
                assert!(cmd.force);
                assert!(!cmd.dry_run);
                assert_eq!(cmd.max_failures, Some(2));
                assert_eq!(cmd.jobs, Some(8));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["cairn", "dag", "-C", "/tmp", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.directory.as_deref(), Some(std::path::Path::new("/tmp")));
        assert!(matches!(cli.command, Commands::Dag(_)));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["cairn", "-q", "-v", "build"]).is_err());
        assert!(Cli::try_parse_from(["cairn", "clean-state"]).is_ok());
    }
}
