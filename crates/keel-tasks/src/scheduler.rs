//! Dependency-driven async task execution on tokio
//!
//! Every node carries a count of unfinished dependencies. A node whose count
//! reaches zero is queued; queued nodes start while the concurrency limit
//! allows. The first failure stops new starts, poisons every transitive
//! dependent, and lets already-running tasks finish without keeping their
//! results.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use keel_core::BuildContext;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::TaskCache;
use crate::dag::TaskGraph;
use crate::reporter::{TaskEvent, TaskReporter};
use crate::result::{DependencyResults, TaskOutput, TaskResult};
use crate::task::{Task, TaskContext, TaskExecutionError, TaskFailure, TaskName};

/// Final status of a task in one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task ran and succeeded
    Completed,
    /// The task found its work up to date
    Skipped,
    /// The task itself failed
    Failed(String),
    /// Not run because an upstream task failed
    Poisoned { by: TaskName },
    /// Not run because the build stopped first
    Cancelled,
}

impl TaskStatus {
    /// Check if this status represents success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "up-to-date",
            Self::Failed(_) => "failed",
            Self::Poisoned { .. } => "poisoned",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Options for the task executor
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum concurrent tasks
    pub concurrency: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Why a build did not succeed
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    TaskFailed(#[from] TaskExecutionError),

    #[error("build cancelled")]
    Cancelled,
}

/// Outcome of one build
#[derive(Debug)]
pub struct BuildReport {
    /// Status of every task, in registration order
    pub statuses: IndexMap<TaskName, TaskStatus>,
    /// Results of successful tasks. A task still running when the first
    /// failure lands keeps its status, but its result is discarded.
    pub results: HashMap<TaskName, Arc<TaskResult>>,
    /// First failure observed
    pub root_cause: Option<TaskExecutionError>,
    /// Whether the build was cancelled externally
    pub cancelled: bool,
    pub duration: Duration,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.root_cause.is_none() && self.statuses.values().all(|s| s.is_success())
    }

    pub fn status(&self, name: &TaskName) -> Option<&TaskStatus> {
        self.statuses.get(name)
    }

    pub fn result(&self, name: &TaskName) -> Option<&Arc<TaskResult>> {
        self.results.get(name)
    }

    pub fn count(&self, predicate: impl Fn(&TaskStatus) -> bool) -> usize {
        self.statuses.values().filter(|s| predicate(s)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Completed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Failed(_)))
    }

    pub fn poisoned(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Poisoned { .. }))
    }

    pub fn cancelled_tasks(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Cancelled))
    }

    /// Tasks that failed on their own, as opposed to poisoned dependents
    pub fn failures(&self) -> Vec<(&TaskName, &str)> {
        self.statuses
            .iter()
            .filter_map(|(name, status)| match status {
                TaskStatus::Failed(msg) => Some((name, msg.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn into_result(self) -> Result<BuildReport, BuildError> {
        if let Some(cause) = self.root_cause {
            return Err(BuildError::TaskFailed(cause));
        }
        if self.cancelled || self.cancelled_tasks() > 0 {
            return Err(BuildError::Cancelled);
        }
        Ok(self)
    }
}

/// Executes a task graph with bounded parallelism
pub struct TaskExecutor {
    options: ExecutorOptions,
    context: Arc<BuildContext>,
    cache: Arc<TaskCache>,
    reporter: Arc<dyn TaskReporter>,
    cancellation: CancellationToken,
}

type Outcome = Result<(TaskOutput, Option<bool>), TaskFailure>;

type Supervised = (usize, Duration, Result<Outcome, JoinError>);

/// Resolve a joined supervisor to its task index. A supervisor that itself
/// failed is attributed through its task id and counts as a panic.
fn settle(
    joined: Result<(Id, Supervised), JoinError>,
    supervisors: &mut HashMap<Id, usize>,
) -> Option<(usize, Duration, Outcome)> {
    match joined {
        Ok((id, (idx, duration, outcome))) => {
            supervisors.remove(&id);
            let outcome = outcome.unwrap_or_else(|e| Err(TaskFailure::Panicked(panic_message(e))));
            Some((idx, duration, outcome))
        }
        Err(e) => {
            warn!(error = %e, "task supervisor failed");
            let idx = supervisors.remove(&e.id())?;
            Some((idx, Duration::ZERO, Err(TaskFailure::Panicked(panic_message(e)))))
        }
    }
}

impl TaskExecutor {
    /// Create a new executor
    pub fn new(
        context: Arc<BuildContext>,
        cache: Arc<TaskCache>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        Self {
            options: ExecutorOptions::default(),
            context,
            cache,
            reporter,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that stops the build when cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Execute all tasks in the graph
    #[instrument(skip_all, fields(tasks = graph.len(), concurrency = self.options.concurrency))]
    pub async fn execute(&self, graph: &TaskGraph) -> BuildReport {
        let start = Instant::now();
        let total = graph.len();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));

        let mut remaining: Vec<usize> = (0..total)
            .map(|i| graph.node_at(i).map(|n| n.dependencies.len()).unwrap_or(0))
            .collect();
        let mut ready: VecDeque<usize> = (0..total).filter(|&i| remaining[i] == 0).collect();
        let mut statuses: Vec<Option<TaskStatus>> = vec![None; total];
        let mut results: Vec<Option<Arc<TaskResult>>> = vec![None; total];
        let mut root_cause: Option<TaskExecutionError> = None;
        let mut failed = false;
        let mut cancelled = false;

        let mut running: JoinSet<Supervised> = JoinSet::new();
        let mut supervisors: HashMap<Id, usize> = HashMap::new();

        loop {
            cancelled |= self.cancellation.is_cancelled();
            while !failed && !cancelled {
                let Some(&idx) = ready.front() else { break };
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                ready.pop_front();
                let Some(node) = graph.node_at(idx) else { continue };

                let deps: Vec<Arc<TaskResult>> = node
                    .dependencies
                    .iter()
                    .filter_map(|d| graph.index_of(d).and_then(|i| results[i].clone()))
                    .collect();

                let task = node.task.clone();
                let ctx = TaskContext::new(
                    node.name.clone(),
                    self.context.tasks_root().join(node.name.output_dir_name()),
                    self.context.clone(),
                    self.cache.clone(),
                    self.reporter.clone(),
                    self.cancellation.clone(),
                );
                self.reporter.report(&TaskEvent::Started {
                    task: node.name.clone(),
                    description: task.description(),
                });

                let handle = tokio::spawn(run_task(task, DependencyResults::new(deps), ctx));
                let supervisor = running.spawn(async move {
                    let started = Instant::now();
                    let joined = handle.await;
                    drop(permit);
                    (idx, started.elapsed(), joined)
                });
                supervisors.insert(supervisor.id(), idx);
            }

            if running.is_empty() {
                break;
            }

            let joined = tokio::select! {
                _ = self.cancellation.cancelled(), if !cancelled => {
                    warn!("build cancelled, waiting for running tasks");
                    cancelled = true;
                    continue;
                }
                joined = running.join_next_with_id() => joined,
            };
            let Some(joined) = joined else { break };

            let Some((idx, duration, outcome)) = settle(joined, &mut supervisors) else { continue };
            let Some(node) = graph.node_at(idx) else { continue };
            let name = node.name.clone();

            match outcome {
                Ok((output, up_to_date)) => {
                    if failed {
                        debug!(task = %name, "result discarded, build already failed");
                    } else {
                        let deps = node
                            .dependencies
                            .iter()
                            .filter_map(|d| graph.index_of(d).and_then(|i| results[i].clone()))
                            .collect();
                        results[idx] = Some(Arc::new(TaskResult::new(name.clone(), output, deps)));
                    }

                    if up_to_date == Some(true) {
                        statuses[idx] = Some(TaskStatus::Skipped);
                        self.reporter.report(&TaskEvent::UpToDate {
                            task: name.clone(),
                            duration,
                        });
                    } else {
                        statuses[idx] = Some(TaskStatus::Completed);
                        self.reporter.report(&TaskEvent::Completed {
                            task: name.clone(),
                            duration,
                        });
                    }

                    for dependent in &node.dependents {
                        if let Some(d) = graph.index_of(dependent) {
                            remaining[d] = remaining[d].saturating_sub(1);
                            if remaining[d] == 0 && statuses[d].is_none() {
                                ready.push_back(d);
                            }
                        }
                    }
                }
                Err(TaskFailure::Cancelled) if self.cancellation.is_cancelled() => {
                    debug!(task = %name, "task stopped by cancellation");
                    cancelled = true;
                    statuses[idx] = Some(TaskStatus::Cancelled);
                }
                Err(failure) => {
                    let message = failure.to_string();
                    debug!(task = %name, error = %message, "task failed");
                    self.reporter.report(&TaskEvent::Failed {
                        task: name.clone(),
                        duration,
                        error: message.clone(),
                    });
                    statuses[idx] = Some(TaskStatus::Failed(message));
                    if root_cause.is_none() {
                        root_cause = Some(TaskExecutionError {
                            task: name.clone(),
                            cause: Arc::new(failure),
                        });
                    }
                    failed = true;
                    self.poison_dependents(graph, idx, &mut statuses);
                }
            }
        }

        let mut report_statuses = IndexMap::with_capacity(total);
        let mut report_results = HashMap::new();
        for idx in 0..total {
            let Some(node) = graph.node_at(idx) else { continue };
            let status = statuses[idx].take().unwrap_or(TaskStatus::Cancelled);
            report_statuses.insert(node.name.clone(), status);
            if let Some(result) = results[idx].take() {
                report_results.insert(node.name.clone(), result);
            }
        }

        let report = BuildReport {
            statuses: report_statuses,
            results: report_results,
            root_cause,
            cancelled,
            duration: start.elapsed(),
        };

        self.reporter.report(&TaskEvent::AllCompleted {
            total,
            completed: report.completed(),
            skipped: report.skipped(),
            failed: report.failed(),
            poisoned: report.poisoned(),
            cancelled: report.cancelled_tasks(),
            duration: report.duration,
        });
        info!(
            success = report.is_success(),
            duration_ms = report.duration.as_millis() as u64,
            "build finished"
        );

        report
    }

    /// Mark every transitive dependent of `failed_idx` as poisoned
    fn poison_dependents(
        &self,
        graph: &TaskGraph,
        failed_idx: usize,
        statuses: &mut [Option<TaskStatus>],
    ) {
        let Some(failed) = graph.node_at(failed_idx) else { return };
        let mut queue: VecDeque<&TaskName> = failed.dependents.iter().collect();
        while let Some(name) = queue.pop_front() {
            let Some(idx) = graph.index_of(name) else { continue };
            if statuses[idx].is_some() {
                continue;
            }
            statuses[idx] = Some(TaskStatus::Poisoned {
                by: failed.name.clone(),
            });
            self.reporter.report(&TaskEvent::Poisoned {
                task: name.clone(),
                by: failed.name.clone(),
            });
            if let Some(node) = graph.node_at(idx) {
                queue.extend(node.dependents.iter());
            }
        }
    }
}

async fn run_task(task: Arc<dyn Task>, deps: DependencyResults, ctx: TaskContext) -> Outcome {
    tokio::fs::create_dir_all(ctx.output_dir()).await?;
    let output = task.run(&deps, &ctx).await?;
    Ok((output, ctx.up_to_date()))
}

fn panic_message(error: tokio::task::JoinError) -> String {
    if error.is_cancelled() {
        return "task was aborted".to_string();
    }
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
