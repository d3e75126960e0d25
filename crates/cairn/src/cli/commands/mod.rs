//! CLI commands

mod build;
mod clean_state;
mod dag;

pub use build::BuildCommand;
pub use clean_state::CleanStateCommand;
pub use dag::DagCommand;

use std::path::PathBuf;

use tracing::debug;

use cairn_core::{load_config_or_default, project_root, Config};

/// Configuration found from the working directory and the project root it
/// belongs to. Without a config file the working directory is the root.
pub(crate) fn load_project() -> anyhow::Result<(Config, PathBuf)> {
    let cwd = std::env::current_dir()?;
    let (config, config_path) = load_config_or_default(&cwd)?;

    let root = match &config_path {
        Some(path) => project_root(path),
        None => cwd,
    };
    debug!(root = %root.display(), config = ?config_path, "resolved project");
    Ok((config, root))
}
