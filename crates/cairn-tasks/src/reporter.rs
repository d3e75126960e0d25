//! Task execution reporting
//!
//! The engine publishes [`TaskEvent`]s; sinks decide what to do with them.
//! Nothing in the engine depends on how a sink reacts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::report::{RunStatus, RunSummary};
use crate::task::{Outcome, TaskId};

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task entered the graph
    Collected { id: TaskId },
    /// The graph is invalid, or a provisional node of `id` could not be
    /// resolved
    ResolutionError { id: Option<TaskId>, message: String },
    /// Something was recovered from, e.g. an unreadable lockfile
    Warning { message: String },
    /// A task was dispatched to the executor
    ExecutionStarted { id: TaskId },
    /// A task reached its terminal outcome
    ExecutionFinished {
        id: TaskId,
        outcome: Outcome,
        message: Option<String>,
        duration: Duration,
    },
    /// The run is over
    RunFinished {
        status: RunStatus,
        summary: RunSummary,
    },
}

/// Sink for task events
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Collected { id } => {
                tracing::debug!(task = %id, "collected");
            }
            TaskEvent::ResolutionError { id: Some(id), message } => {
                tracing::error!(task = %id, "resolution failed: {}", message);
            }
            TaskEvent::ResolutionError { id: None, message } => {
                tracing::error!("resolution failed: {}", message);
            }
            TaskEvent::Warning { message } => {
                tracing::warn!("{}", message);
            }
            TaskEvent::ExecutionStarted { id } => {
                tracing::info!(task = %id, "started");
            }
            TaskEvent::ExecutionFinished {
                id,
                outcome: Outcome::Fail,
                message,
                duration,
            } => {
                tracing::error!(
                    task = %id,
                    "failed after {:.1}s: {}",
                    duration.as_secs_f64(),
                    message.as_deref().unwrap_or("unknown error")
                );
            }
            TaskEvent::ExecutionFinished {
                id,
                outcome,
                duration,
                ..
            } => {
                tracing::info!(task = %id, %outcome, "finished in {:.1}s", duration.as_secs_f64());
            }
            TaskEvent::RunFinished { status, summary } => {
                tracing::info!(
                    %status,
                    "run finished: {}/{} succeeded, {} failed, {} unchanged ({:.1}s)",
                    summary.succeeded,
                    summary.total,
                    summary.failed,
                    summary.unchanged,
                    summary.duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskReporter for ChannelReporter {
    fn report(&self, event: &TaskEvent) {
        // A dropped receiver only means nobody listens anymore.
        let _ = self.sender.send(event.clone());
    }
}

/// Registry of task reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Register a reporter the caller keeps a handle to
    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
