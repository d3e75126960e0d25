//! Per-task reports and the run aggregate

use std::time::Duration;

use serde::Serialize;

use crate::task::{Outcome, TaskId};

/// Terminal outcome of one task with its captured error
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub outcome: Outcome,
    /// Error message of a failed task, or the reason for a skip
    pub message: Option<String>,
    #[serde(with = "millis")]
    pub duration: Duration,
}

/// Run-level status, from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    ExecutionError,
    ResolutionError,
}

impl RunStatus {
    /// Worst status implied by a set of outcomes
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
        if outcomes.into_iter().any(Outcome::is_failure) {
            Self::ExecutionError
        } else {
            Self::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ExecutionError => "execution_error",
            Self::ResolutionError => "resolution_error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counts of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub skipped_ancestor_failed: usize,
    pub unchanged: usize,
    pub persisted: usize,
    pub would_be_executed: usize,
    pub cancelled: usize,
    #[serde(with = "millis")]
    pub duration: Duration,
}

impl RunSummary {
    pub fn from_reports(reports: &[TaskReport], duration: Duration) -> Self {
        let mut summary = Self {
            total: reports.len(),
            duration,
            ..Default::default()
        };
        for report in reports {
            let counter = match report.outcome {
                Outcome::Success => &mut summary.succeeded,
                Outcome::Fail => &mut summary.failed,
                Outcome::Skip => &mut summary.skipped,
                Outcome::SkippedAncestorFailed => &mut summary.skipped_ancestor_failed,
                Outcome::SkippedUnchanged => &mut summary.unchanged,
                Outcome::Persisted => &mut summary.persisted,
                Outcome::WouldBeExecuted => &mut summary.would_be_executed,
                Outcome::Cancelled => &mut summary.cancelled,
            };
            *counter += 1;
        }
        summary
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
