//! Round-based task scheduler.
//!
//! Each round takes a snapshot of the pending tasks, schedules every task
//! whose dependencies match nothing in that snapshot (up to the concurrency
//! bound), runs the batch on a `JoinSet` and joins it before the next round.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::FailurePolicy;
use crate::error::{OrgFormError, Result, SchedulingError};

use super::task::{Task, TaskGraph, TaskId, TaskIdentity};

/// Scheduler options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Maximum number of tasks run in one round.
    pub max_concurrency: usize,
    /// Number of failed tasks tolerated before aborting.
    pub failure_tolerance: usize,
    /// What happens to dependents of failed tasks.
    pub failure_policy: FailurePolicy,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            failure_tolerance: 0,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

impl RunnerOptions {
    /// Sets the concurrency bound.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the failure tolerance.
    #[must_use]
    pub const fn with_failure_tolerance(mut self, failure_tolerance: usize) -> Self {
        self.failure_tolerance = failure_tolerance;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }
}

/// A task that failed.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Identity of the failed task.
    pub identity: TaskIdentity,
    /// Error message.
    pub error: String,
}

/// Outcome of a runner invocation that was not aborted.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Identities of tasks that completed.
    pub succeeded: Vec<TaskIdentity>,
    /// Tasks that failed.
    pub failed: Vec<TaskFailure>,
    /// Identities of tasks skipped because a dependency failed.
    pub skipped: Vec<TaskIdentity>,
    /// Results returned by completed tasks.
    pub results: BTreeMap<TaskId, String>,
}

impl RunReport {
    /// Returns the number of tasks that ran.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Returns true if no task failed or was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

enum Placement {
    Schedule,
    Defer,
    Skip,
}

/// Round-based scheduler shared by every task family.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskRunner {
    options: RunnerOptions,
}

impl TaskRunner {
    /// Creates a runner.
    #[must_use]
    pub const fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    /// Returns the runner options.
    #[must_use]
    pub const fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Runs every task in the graph.
    ///
    /// # Errors
    ///
    /// Returns a scheduling error on self-dependency, circular dependency,
    /// or when failures exceed the tolerance. Tasks that already ran keep
    /// their effects.
    pub async fn run<C>(&self, graph: TaskGraph<C>, ctx: Arc<C>) -> Result<RunReport>
    where
        C: Send + Sync + 'static,
    {
        let max_concurrency = self.options.max_concurrency.max(1);
        let mut pending = graph.into_tasks();
        let mut report = RunReport::default();
        let mut unsuccessful: Vec<(TaskId, TaskIdentity)> = Vec::new();

        if pending.is_empty() {
            return Ok(report);
        }
        info!(
            "Running {} task(s), concurrency {max_concurrency}, policy {}",
            pending.len(),
            self.options.failure_policy
        );

        let mut round = 0usize;
        while !pending.is_empty() {
            round += 1;

            let mut placements = Vec::with_capacity(pending.len());
            let mut scheduled = 0usize;
            for task in &pending {
                let placement = self.place(task, &pending, &unsuccessful)?;
                let placement = match placement {
                    Placement::Schedule if scheduled >= max_concurrency => Placement::Defer,
                    Placement::Schedule => {
                        scheduled += 1;
                        Placement::Schedule
                    }
                    other => other,
                };
                placements.push(placement);
            }

            let mut batch = Vec::new();
            let mut remaining = Vec::new();
            let mut skipped = 0usize;
            for (task, placement) in pending.into_iter().zip(placements) {
                match placement {
                    Placement::Schedule => batch.push(task),
                    Placement::Defer => remaining.push(task),
                    Placement::Skip => {
                        warn!("Skipping {} because a dependency failed", task.identity);
                        skipped += 1;
                        unsuccessful.push((task.id, task.identity.clone()));
                        report.skipped.push(task.identity);
                    }
                }
            }
            pending = remaining;

            if batch.is_empty() {
                if skipped > 0 || pending.is_empty() {
                    continue;
                }
                return Err(SchedulingError::CircularDependency {
                    tasks: pending.iter().map(|t| t.identity.to_string()).collect(),
                }
                .into());
            }

            debug!(
                "Round {round}: running {} task(s), {} deferred",
                batch.len(),
                pending.len()
            );

            let failed_before = report.failed.len();
            self.run_batch(batch, &ctx, &mut report, &mut unsuccessful)
                .await;

            if report.failed.len() > failed_before
                && report.failed.len() > self.options.failure_tolerance
            {
                return Err(OrgFormError::Scheduling(SchedulingError::ToleranceExceeded {
                    failed: report.failed.len(),
                    tolerance: self.options.failure_tolerance,
                    tasks: report
                        .failed
                        .iter()
                        .map(|f| f.identity.to_string())
                        .collect(),
                }));
            }
        }

        info!(
            "Tasks finished: {} succeeded, {} failed, {} skipped",
            report.succeeded.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Decides what to do with one task in the current round.
    fn place<C>(
        &self,
        task: &Task<C>,
        pending: &[Task<C>],
        unsuccessful: &[(TaskId, TaskIdentity)],
    ) -> Result<Placement> {
        if task.depends_on.references(task.id, &task.identity) {
            return Err(SchedulingError::SelfDependency {
                task: task.identity.to_string(),
            }
            .into());
        }

        let skip_on_failure = task.depends_on.requires_success
            || self.options.failure_policy == FailurePolicy::SkipDependents;
        if skip_on_failure
            && unsuccessful
                .iter()
                .any(|(id, identity)| task.depends_on.references(*id, identity))
        {
            return Ok(Placement::Skip);
        }

        let blocked = pending
            .iter()
            .filter(|other| other.id != task.id)
            .any(|other| task.depends_on.references(other.id, &other.identity));

        Ok(if blocked {
            Placement::Defer
        } else {
            Placement::Schedule
        })
    }

    async fn run_batch<C>(
        &self,
        batch: Vec<Task<C>>,
        ctx: &Arc<C>,
        report: &mut RunReport,
        unsuccessful: &mut Vec<(TaskId, TaskIdentity)>,
    ) where
        C: Send + Sync + 'static,
    {
        let mut identities = BTreeMap::new();
        let mut set = JoinSet::new();

        for task in batch {
            debug!("Starting {}", task.identity);
            let operation = Arc::clone(&task.operation);
            let ctx = Arc::clone(ctx);
            let id = task.id;
            identities.insert(id, task.identity);
            set.spawn(async move { (id, operation.perform(&ctx).await) });
        }

        let mut finished = HashSet::new();
        while let Some(joined) = set.join_next().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome.map_err(|e| e.to_string())),
                Err(join_error) => {
                    // Panicked tasks are recorded as failures after the join.
                    error!("Task panicked: {join_error}");
                    continue;
                }
            };
            finished.insert(id);

            let Some(identity) = identities.get(&id).cloned() else {
                continue;
            };
            match outcome {
                Ok(result) => {
                    debug!("Finished {identity}");
                    if let Some(result) = result {
                        report.results.insert(id, result);
                    }
                    report.succeeded.push(identity);
                }
                Err(message) => {
                    error!("Task {identity} failed: {message}");
                    unsuccessful.push((id, identity.clone()));
                    report.failed.push(TaskFailure {
                        identity,
                        error: message,
                    });
                }
            }
        }

        for (id, identity) in identities {
            if !finished.contains(&id) {
                unsuccessful.push((id, identity.clone()));
                report.failed.push(TaskFailure {
                    identity,
                    error: String::from("task panicked"),
                });
            }
        }
    }
}
