//! Build session
//!
//! A session owns everything one run needs: the graph, the state store, the
//! scheduler and the reporters. Executors run on blocking workers and send
//! their results back here, so the scheduler and the store each have a single
//! owner.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use cairn_core::Config;

use crate::dag::{ResolvingDependenciesError, Slot, TaskDag};
use crate::executor::{self, Job, JobResult};
use crate::plan::{self, observe, tracked, Decision};
use crate::report::{RunStatus, RunSummary, TaskReport};
use crate::reporter::{TaskEvent, TaskReporterRegistry};
use crate::scheduler::{Admission, Scheduler};
use crate::state::{StateError, StateOptions, StateSource, StateStore};
use crate::task::{Outcome, Task, TaskId};

/// Errors that end a session early
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// One or more tasks failed
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub failures: Vec<TaskReport>,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {}", failure.id)?;
            if let Some(message) = &failure.message {
                write!(f, ": {}", message)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}

/// Options for a build session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Project root; portable ids are relative to it
    pub root: PathBuf,
    /// Maximum tasks executing at once
    pub concurrency: usize,
    /// Stop admitting tasks after this many failures
    pub max_failures: Option<usize>,
    /// Treat every task as stale
    pub force: bool,
    /// Report stale tasks without executing them
    pub dry_run: bool,
    pub state: StateOptions,
}

impl SessionOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            state: StateOptions::new(root.join(".cairn").join("cairn.lock")),
            root,
            concurrency: 4,
            max_failures: None,
            force: false,
            dry_run: false,
        }
    }

    pub fn from_config(config: &Config, root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            concurrency: config.engine.concurrency.max(1),
            max_failures: config.engine.max_failures,
            force: config.engine.force,
            dry_run: config.engine.dry_run,
            state: StateOptions::from_config(&config.state, root),
        }
    }
}

/// Requests a running session to stop admitting tasks
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Stop admitting tasks; running tasks finish normally
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate result of a run
#[derive(Debug)]
pub struct RunResult {
    pub status: RunStatus,
    /// One report per task, in declaration order
    pub reports: Vec<TaskReport>,
    pub summary: RunSummary,
    /// Why nothing ran, when the graph was invalid
    pub resolution_error: Option<ResolvingDependenciesError>,
    /// Whether the run was cancelled from outside
    pub cancelled: bool,
}

impl RunResult {
    pub fn report(&self, id: &str) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.id.as_str() == id)
    }

    pub fn outcome(&self, id: &str) -> Option<Outcome> {
        self.report(id).map(|r| r.outcome)
    }

    /// Failed tasks as a single error
    pub fn execution_error(&self) -> Option<ExecutionError> {
        let failures: Vec<TaskReport> = self
            .reports
            .iter()
            .filter(|r| r.outcome.is_failure())
            .cloned()
            .collect();
        (!failures.is_empty()).then_some(ExecutionError { failures })
    }
}

enum Prepared {
    Dispatch(Box<Job>),
    Deferred,
    Finished(Vec<(usize, Outcome, Option<String>)>),
}

/// Drives one build from a task list to a [`RunResult`]
pub struct Session {
    options: SessionOptions,
    reporters: Arc<TaskReporterRegistry>,
    cancel: CancelHandle,
}

impl Session {
    pub fn new(options: SessionOptions, reporters: TaskReporterRegistry) -> Self {
        Self {
            options,
            reporters: Arc::new(reporters),
            cancel: CancelHandle::new(),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run on a fresh tokio runtime
    pub fn run_blocking(&self, tasks: Vec<Task>) -> Result<RunResult, SessionError> {
        let runtime = tokio::runtime::Runtime::new().map_err(SessionError::Runtime)?;
        runtime.block_on(self.run(tasks))
    }

    /// Build the graph, plan, execute stale tasks and persist their state.
    ///
    /// An invalid graph is reported through the result, never executed.
    #[instrument(skip_all, fields(tasks = tasks.len(), root = %self.options.root.display()))]
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunResult, SessionError> {
        let start = Instant::now();

        for task in &tasks {
            self.emit(TaskEvent::Collected {
                id: task.id.clone(),
            });
        }

        let mut dag = match TaskDag::build(tasks) {
            Ok(dag) => dag,
            Err(e) => {
                error!(error = %e, "invalid task graph");
                self.emit(TaskEvent::ResolutionError {
                    id: None,
                    message: e.to_string(),
                });
                return Ok(self.finish_run(Vec::new(), start, Some(e)));
            }
        };

        let mut store = StateStore::load(&self.options.state)?;
        if let Some(e) = store.take_recovered() {
            self.emit(TaskEvent::Warning {
                message: format!("{}; rebuilding all tasks", e),
            });
        }

        let root = self.options.root.clone();
        let plan = plan::plan(&dag, &store, &root, self.options.force);
        let mut scheduler = Scheduler::new(&dag, &plan, self.options.max_failures);
        let mut reports: Vec<Option<TaskReport>> = vec![None; dag.len()];

        for index in 0..dag.len() {
            match plan.decision(index) {
                Decision::Run => {}
                Decision::Unchanged => {
                    if store.source() == StateSource::Legacy && !self.options.dry_run {
                        self.migrate_legacy(&dag, index, &mut store)?;
                    }
                    self.finish_task(&dag, &mut reports, index, Outcome::SkippedUnchanged, None, Duration::ZERO);
                }
                Decision::Skip(reason) => {
                    let reason = Some(reason.clone());
                    self.finish_task(&dag, &mut reports, index, Outcome::Skip, reason, Duration::ZERO);
                }
            }
        }

        let concurrency = self.options.concurrency.max(1);
        let mut running: JoinSet<JobResult> = JoinSet::new();
        let mut cancel = self.cancel.subscribe();
        let mut state_error: Option<StateError> = None;

        loop {
            if *cancel.borrow() && !scheduler.is_stopped() {
                info!("cancellation requested, draining running tasks");
                scheduler.stop();
            }

            while running.len() < concurrency {
                let Some(index) = scheduler.next_ready() else {
                    break;
                };
                match self.prepare(&mut dag, &mut scheduler, &store, index) {
                    Prepared::Dispatch(job) => {
                        self.emit(TaskEvent::ExecutionStarted {
                            id: job.task.id.clone(),
                        });
                        running.spawn_blocking(move || executor::run(*job));
                    }
                    Prepared::Deferred => {}
                    Prepared::Finished(finished) => {
                        for (index, outcome, message) in finished {
                            self.finish_task(&dag, &mut reports, index, outcome, message, Duration::ZERO);
                        }
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok(result)) => {
                        if let Err(e) = self.complete(&dag, &mut scheduler, &mut store, &mut reports, result) {
                            error!(error = %e, "failed to record task state, stopping");
                            scheduler.stop();
                            state_error.get_or_insert(e);
                        }
                    }
                    Some(Err(e)) => error!(error = %e, "task worker aborted"),
                    None => {}
                },
                changed = cancel.changed(), if !scheduler.is_stopped() => {
                    if changed.is_ok() && *cancel.borrow() {
                        info!("cancellation requested, draining running tasks");
                        scheduler.stop();
                    }
                }
            }
        }

        for (index, outcome) in scheduler.finalize().into_iter().enumerate() {
            if reports[index].is_none() {
                self.finish_task(&dag, &mut reports, index, outcome, None, Duration::ZERO);
            }
        }

        if let Some(e) = state_error {
            return Err(e.into());
        }
        if !self.options.dry_run {
            store.flush()?;
        }

        Ok(self.finish_run(reports.into_iter().flatten().collect(), start, None))
    }

    /// Expand provisional nodes and turn a ready task into a job
    fn prepare(
        &self,
        dag: &mut TaskDag,
        scheduler: &mut Scheduler,
        store: &StateStore,
        index: usize,
    ) -> Prepared {
        for (slot, name, node) in dag.pending_expansions(index) {
            let expanded = node
                .collect()
                .map_err(|e| e.to_string())
                .and_then(|nodes| dag.extend(index, slot, &name, nodes).map_err(|e| e.to_string()));

            if let Err(message) = expanded {
                let id = dag.task(index).id.clone();
                warn!(task = %id, %message, "failed to resolve provisional node");
                self.emit(TaskEvent::ResolutionError {
                    id: Some(id.clone()),
                    message: message.clone(),
                });
                let skipped = scheduler.complete(index, Outcome::Fail);
                let mut finished = vec![(index, Outcome::Fail, Some(message))];
                finished.extend(ancestor_failed(&id, skipped));
                return Prepared::Finished(finished);
            }
        }

        match scheduler.defer(index, &dag.predecessors(index)) {
            Admission::Proceed => {}
            Admission::Deferred => return Prepared::Deferred,
            Admission::AncestorFailed(skipped) => {
                return Prepared::Finished(
                    skipped
                        .into_iter()
                        .map(|i| (i, Outcome::SkippedAncestorFailed, None))
                        .collect(),
                );
            }
        }

        let mut job = Job::new(dag, index, &self.options.root);
        job.dry_run = self.options.dry_run;
        job.early_cutoff = !self.options.force;
        job.previous = job
            .tracked_ids()
            .into_iter()
            .filter_map(|id| store.get(&id).map(|signature| (id, signature)))
            .collect();
        Prepared::Dispatch(Box::new(job))
    }

    /// Apply a finished job: record its state, then update the scheduler
    fn complete(
        &self,
        dag: &TaskDag,
        scheduler: &mut Scheduler,
        store: &mut StateStore,
        reports: &mut [Option<TaskReport>],
        result: JobResult,
    ) -> Result<(), StateError> {
        let id = dag.task(result.index).id.clone();

        if !self.options.dry_run {
            for (portable_id, signature) in result.records {
                store.record(portable_id, signature)?;
            }
        }

        let skipped = scheduler.complete(result.index, result.outcome);
        self.finish_task(dag, reports, result.index, result.outcome, result.message, result.duration);
        for (index, outcome, message) in ancestor_failed(&id, skipped) {
            self.finish_task(dag, reports, index, outcome, message, Duration::ZERO);
        }
        Ok(())
    }

    /// Copy signatures of an unchanged task from the legacy database into
    /// the lockfile
    fn migrate_legacy(&self, dag: &TaskDag, index: usize, store: &mut StateStore) -> Result<(), StateError> {
        let task = dag.task(index);
        let keys = tracked(
            task,
            &dag.resolved(index, Slot::Dependency),
            &dag.resolved(index, Slot::Product),
            &self.options.root,
        );
        for (id, state) in observe(task, &keys) {
            if let Some(state) = state {
                store.record(id, state)?;
            }
        }
        Ok(())
    }

    fn finish_task(
        &self,
        dag: &TaskDag,
        reports: &mut [Option<TaskReport>],
        index: usize,
        outcome: Outcome,
        message: Option<String>,
        duration: Duration,
    ) {
        let id = dag.task(index).id.clone();
        self.emit(TaskEvent::ExecutionFinished {
            id: id.clone(),
            outcome,
            message: message.clone(),
            duration,
        });
        reports[index] = Some(TaskReport {
            id,
            outcome,
            message,
            duration,
        });
    }

    fn finish_run(
        &self,
        reports: Vec<TaskReport>,
        start: Instant,
        resolution_error: Option<ResolvingDependenciesError>,
    ) -> RunResult {
        let status = if resolution_error.is_some() {
            RunStatus::ResolutionError
        } else {
            RunStatus::from_outcomes(reports.iter().map(|r| &r.outcome))
        };
        let summary = RunSummary::from_reports(&reports, start.elapsed());

        self.emit(TaskEvent::RunFinished {
            status,
            summary: summary.clone(),
        });

        RunResult {
            status,
            reports,
            summary,
            resolution_error,
            cancelled: self.cancel.is_cancelled(),
        }
    }

    fn emit(&self, event: TaskEvent) {
        self.reporters.broadcast(&event);
    }
}

fn ancestor_failed(failed: &TaskId, skipped: Vec<usize>) -> Vec<(usize, Outcome, Option<String>)> {
    skipped
        .into_iter()
        .map(|index| {
            (
                index,
                Outcome::SkippedAncestorFailed,
                Some(format!("upstream task '{}' failed", failed)),
            )
        })
        .collect()
}
