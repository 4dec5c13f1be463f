//! Task execution reporting

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::task::TaskName;

/// Events emitted during task execution
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task is starting execution
    Started {
        task: TaskName,
        description: String,
    },
    /// A task produced output
    Output {
        task: TaskName,
        line: String,
        is_stderr: bool,
    },
    /// A task ran and completed successfully
    Completed {
        task: TaskName,
        duration: Duration,
    },
    /// A task found all of its work up to date
    UpToDate {
        task: TaskName,
        duration: Duration,
    },
    /// A task failed
    Failed {
        task: TaskName,
        duration: Duration,
        error: String,
    },
    /// A task will not run because an upstream task failed
    Poisoned {
        task: TaskName,
        by: TaskName,
    },
    /// All tasks completed
    AllCompleted {
        total: usize,
        completed: usize,
        skipped: usize,
        failed: usize,
        poisoned: usize,
        cancelled: usize,
        duration: Duration,
    },
}

/// Trait for reporting task execution progress
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
            TaskEvent::Started { task, description } => {
                tracing::info!(task = %task, "starting: {}", description);
            }
            TaskEvent::Output {
                task,
                line,
                is_stderr,
            } => {
                if *is_stderr {
                    tracing::warn!("[{}] {}", task, line);
                } else {
                    tracing::debug!("[{}] {}", task, line);
                }
            }
            TaskEvent::Completed { task, duration } => {
                tracing::info!("{} completed in {:.1}s", task, duration.as_secs_f64());
            }
            TaskEvent::UpToDate { task, .. } => {
                tracing::info!("{} up to date", task);
            }
            TaskEvent::Failed {
                task,
                duration,
                error,
            } => {
                tracing::error!("{} failed after {:.1}s: {}", task, duration.as_secs_f64(), error);
            }
            TaskEvent::Poisoned { task, by } => {
                tracing::warn!("{} not run: dependency {} failed", task, by);
            }
            TaskEvent::AllCompleted {
                total,
                completed,
                skipped,
                failed,
                poisoned,
                cancelled,
                duration,
            } => {
                tracing::info!(
                    total,
                    completed,
                    skipped,
                    failed,
                    poisoned,
                    cancelled,
                    "build finished in {:.1}s",
                    duration.as_secs_f64()
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
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Names of tasks in the order they were started
    pub fn started(&self) -> Vec<TaskName> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Started { task, .. } => Some(task),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
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

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        self.broadcast(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        let task = TaskName::new(":core:compileJvm");

        reporter.report(&TaskEvent::Started {
            task: task.clone(),
            description: "javac".to_string(),
        });
        reporter.report(&TaskEvent::Completed {
            task: task.clone(),
            duration: Duration::from_secs(5),
        });

        assert_eq!(reporter.events().len(), 2);
        assert_eq!(reporter.started(), vec![task]);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;
        let task = TaskName::new(":core:compileJvm");

        reporter.report(&TaskEvent::Poisoned {
            task: task.clone(),
            by: TaskName::new(":core:generateJvm"),
        });
        reporter.report(&TaskEvent::UpToDate {
            task,
            duration: Duration::from_millis(3),
        });
    }

    #[test]
    fn test_empty_registry() {
        let registry = TaskReporterRegistry::empty();
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_registry_is_a_reporter() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::empty();
        registry.register_shared(collecting.clone());
        registry.register(TracingReporter);

        let reporter: &dyn TaskReporter = &registry;
        reporter.report(&TaskEvent::Started {
            task: TaskName::new(":core:jarJvm"),
            description: "jar".to_string(),
        });

        assert_eq!(registry.all().len(), 2);
        assert_eq!(collecting.events().len(), 1);
    }
}
