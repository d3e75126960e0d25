//! Ready-set scheduler
//!
//! A synchronous state machine owned by the session loop. It is the only
//! place where in-degrees and the ready-set change, so admission, completion
//! and failure propagation are serialized by construction.

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, info};

use crate::dag::TaskDag;
use crate::plan::{Decision, Plan};
use crate::task::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Waiting,
    Ready,
    Running,
    Done,
}

/// Result of re-checking a dispatched task after its graph changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// All predecessors are done, run it
    Proceed,
    /// Newly discovered predecessors are still pending
    Deferred,
    /// A newly discovered predecessor failed. Lists the task and every
    /// descendant marked as skipped.
    AncestorFailed(Vec<usize>),
}

/// Priority-aware ready-set over the tasks of one run
#[derive(Debug)]
pub struct Scheduler {
    ranks: Vec<usize>,
    status: Vec<Status>,
    outcomes: Vec<Option<Outcome>>,
    pending: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    /// One bucket per priority rank, declaration order within a bucket
    ready: [BTreeSet<usize>; 3],
    failures: usize,
    max_failures: Option<usize>,
    stopped: bool,
}

impl Scheduler {
    /// Tasks the plan does not run are done from the start
    pub fn new(dag: &TaskDag, plan: &Plan, max_failures: Option<usize>) -> Self {
        let count = dag.len();
        let mut scheduler = Self {
            ranks: dag.tasks().iter().map(|t| t.priority.rank()).collect(),
            status: vec![Status::Waiting; count],
            outcomes: vec![None; count],
            pending: vec![0; count],
            dependents: (0..count).map(|i| dag.dependents(i)).collect(),
            ready: Default::default(),
            failures: 0,
            max_failures,
            stopped: false,
        };

        for index in 0..count {
            let outcome = match plan.decision(index) {
                Decision::Run => continue,
                Decision::Unchanged => Outcome::SkippedUnchanged,
                Decision::Skip(_) => Outcome::Skip,
            };
            scheduler.status[index] = Status::Done;
            scheduler.outcomes[index] = Some(outcome);
        }

        for index in 0..count {
            if scheduler.status[index] != Status::Waiting {
                continue;
            }
            scheduler.pending[index] = dag
                .predecessors(index)
                .into_iter()
                .filter(|&p| scheduler.status[p] != Status::Done)
                .count();
            if scheduler.pending[index] == 0 {
                scheduler.make_ready(index);
            }
        }

        scheduler
    }

    /// Next task to dispatch, highest priority first.
    ///
    /// Returns `None` once stopped, even if tasks are ready.
    pub fn next_ready(&mut self) -> Option<usize> {
        if self.stopped {
            return None;
        }
        let index = self.ready.iter_mut().find_map(|bucket| bucket.pop_first())?;
        self.status[index] = Status::Running;
        Some(index)
    }

    /// Re-check a task returned by [`next_ready`](Self::next_ready) against
    /// its current predecessors, which may have grown while expanding
    /// provisional nodes.
    pub fn defer(&mut self, index: usize, predecessors: &[usize]) -> Admission {
        let mut waiting = 0;

        for &predecessor in predecessors {
            match self.outcomes[predecessor] {
                Some(outcome) if !outcome.unblocks_dependents() => {
                    self.status[index] = Status::Done;
                    self.outcomes[index] = Some(Outcome::SkippedAncestorFailed);
                    let mut skipped = vec![index];
                    skipped.extend(self.skip_descendants(index));
                    return Admission::AncestorFailed(skipped);
                }
                Some(_) => {}
                None => {
                    if !self.dependents[predecessor].contains(&index) {
                        self.dependents[predecessor].push(index);
                    }
                    waiting += 1;
                }
            }
        }

        if waiting == 0 {
            return Admission::Proceed;
        }
        debug!(task = index, waiting, "deferring task until new predecessors finish");
        self.status[index] = Status::Waiting;
        self.pending[index] = waiting;
        Admission::Deferred
    }

    /// Record a finished task.
    ///
    /// Returns the descendants marked [`Outcome::SkippedAncestorFailed`] when
    /// the outcome does not let dependents run.
    pub fn complete(&mut self, index: usize, outcome: Outcome) -> Vec<usize> {
        self.status[index] = Status::Done;
        self.outcomes[index] = Some(outcome);

        if outcome.is_failure() {
            self.failures += 1;
            if self.max_failures.is_some_and(|max| self.failures >= max) && !self.stopped {
                info!(failures = self.failures, "failure budget exhausted, stopping");
                self.stopped = true;
            }
        }

        if !outcome.unblocks_dependents() {
            return self.skip_descendants(index);
        }

        for position in 0..self.dependents[index].len() {
            let dependent = self.dependents[index][position];
            if self.status[dependent] != Status::Waiting {
                continue;
            }
            self.pending[dependent] = self.pending[dependent].saturating_sub(1);
            if self.pending[dependent] == 0 {
                self.make_ready(dependent);
            }
        }
        Vec::new()
    }

    /// Stop admitting tasks. Running tasks are unaffected.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn outcome(&self, index: usize) -> Option<Outcome> {
        self.outcomes[index]
    }

    /// Outcomes of all tasks; tasks that never finished are cancelled
    pub fn finalize(self) -> Vec<Outcome> {
        self.outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(Outcome::Cancelled))
            .collect()
    }

    fn make_ready(&mut self, index: usize) {
        self.status[index] = Status::Ready;
        self.ready[self.ranks[index]].insert(index);
    }

    fn skip_descendants(&mut self, index: usize) -> Vec<usize> {
        let mut skipped = Vec::new();
        let mut queue: VecDeque<usize> = self.dependents[index].iter().copied().collect();

        while let Some(dependent) = queue.pop_front() {
            if self.status[dependent] == Status::Done {
                continue;
            }
            if self.status[dependent] == Status::Ready {
                self.ready[self.ranks[dependent]].remove(&dependent);
            }
            self.status[dependent] = Status::Done;
            self.outcomes[dependent] = Some(Outcome::SkippedAncestorFailed);
            skipped.push(dependent);
            queue.extend(self.dependents[dependent].iter().copied());
        }

        skipped
    }
}

/// Order in which a sequential run would execute every task
pub fn schedule_order(dag: &TaskDag) -> Vec<usize> {
    let plan = Plan::from_decisions(vec![Decision::Run; dag.len()]);
    let mut scheduler = Scheduler::new(dag, &plan, None);
    let mut order = Vec::with_capacity(dag.len());
    while let Some(index) = scheduler.next_ready() {
        order.push(index);
        scheduler.complete(index, Outcome::Success);
    }
    order
}
