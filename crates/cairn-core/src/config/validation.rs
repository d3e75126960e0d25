//! Configuration validation

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_engine(config)?;
    validate_state(config)?;
    validate_tasks(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_engine(config: &Config) -> Result<()> {
    if config.engine.concurrency == 0 {
        return Err(ConfigError::invalid("engine.concurrency", "must be at least 1").into());
    }

    if config.engine.max_failures == Some(0) {
        return Err(ConfigError::invalid("engine.max_failures", "must be at least 1").into());
    }

    Ok(())
}

fn validate_state(config: &Config) -> Result<()> {
    if config.state.compaction_interval == 0 {
        return Err(
            ConfigError::invalid("state.compaction_interval", "must be at least 1").into(),
        );
    }

    if config.state.lockfile.trim().is_empty() {
        return Err(ConfigError::invalid("state.lockfile", "lockfile name cannot be empty").into());
    }

    Ok(())
}

fn validate_tasks(config: &Config) -> Result<()> {
    if !config.tasks.is_empty() {
        debug!(count = config.tasks.len(), "validating tasks");
    }

    let mut seen = HashSet::new();
    for (i, task) in config.tasks.iter().enumerate() {
        if task.id.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("tasks[{}].id", i),
                "task id cannot be empty",
            )
            .into());
        }

        if task.command.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("tasks[{}].command", i),
                "command cannot be empty",
            )
            .into());
        }

        if !seen.insert(task.id.as_str()) {
            return Err(ConfigError::DuplicateTask(task.id.clone()).into());
        }
    }

    Ok(())
}
