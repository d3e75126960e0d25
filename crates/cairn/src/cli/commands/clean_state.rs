//! Clean-state command

use std::path::Path;

use clap::Args;
use tracing::info;

use cairn_core::Config;
use cairn_tasks::{StateError, StateOptions, StateStore};

use super::load_project;
use crate::cli::output::{self, path_style};
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Remove the lockfile and its journal so the next build starts fresh
#[derive(Debug, Args)]
pub struct CleanStateCommand;

impl CleanStateCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        info!("executing clean-state command");
        let (config, root) = load_project()?;
        let options = StateOptions::from_config(&config.state, &root);
        let removed = remove_state(&config, &root)?;

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "lockfile": options.lockfile.display().to_string(),
                    "removed": removed,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text if !cli.quiet => {
                let path = path_style().apply_to(options.lockfile.display());
                if removed {
                    output::success(&format!("Removed {}", path));
                } else {
                    output::info(&format!("No state at {}", path));
                }
            }
            OutputFormat::Text => {}
        }

        Ok(exit_codes::SUCCESS)
    }
}

fn remove_state(config: &Config, root: &Path) -> Result<bool, StateError> {
    StateStore::remove_files(&StateOptions::from_config(&config.state, root))
}
