//! Exit codes for the CLI

use cairn_core::{CairnError, ConfigError};
use cairn_tasks::{RunResult, RunStatus};

/// Success
pub const SUCCESS: i32 = 0;

/// At least one task failed, or an unexpected error occurred
pub const EXECUTION_FAILED: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// The task graph could not be resolved
pub const RESOLUTION_ERROR: i32 = 3;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// Exit code for a finished run
pub fn for_run(result: &RunResult) -> i32 {
    match result.status {
        RunStatus::ResolutionError => RESOLUTION_ERROR,
        RunStatus::ExecutionError => EXECUTION_FAILED,
        RunStatus::Ok if result.cancelled => CANCELLED,
        RunStatus::Ok => SUCCESS,
    }
}

/// Exit code for an error that aborted a command
pub fn for_error(error: &anyhow::Error) -> i32 {
    let is_config = error.downcast_ref::<ConfigError>().is_some()
        || matches!(error.downcast_ref::<CairnError>(), Some(CairnError::Config(_)));
    if is_config {
        CONFIG_ERROR
    } else {
        EXECUTION_FAILED
    }
}
