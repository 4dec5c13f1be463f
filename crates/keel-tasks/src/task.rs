//! Task types and the contract every unit of build work implements

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_core::model::{BuildType, Platform, Selection};
use keel_core::BuildContext;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheError, ExecutionResult, TaskCache};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::result::{DependencyResults, TaskOutput};

/// Unique, hierarchical identifier of one concrete task
///
/// Names produced for matrix cells look like `:app:compileJvmTestRelease`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    /// Create a name verbatim, for tasks outside any module scope
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Naming function for matrix tasks. Registration and peer lookup both go
    /// through here, so the same cell always yields the same name.
    pub fn for_action(
        kind: &str,
        module: &str,
        platform: Platform,
        is_test: bool,
        build_type: Option<BuildType>,
    ) -> Self {
        let mut name = format!(":{}:{}{}", module, kind, platform.pretty());
        if is_test {
            name.push_str("Test");
        }
        if let Some(build_type) = build_type {
            name.push_str(build_type.suffix());
        }
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name of the task-private output directory
    pub fn output_dir_name(&self) -> String {
        let trimmed = self.0.trim_start_matches(':');
        let sanitized: String = trimmed
            .chars()
            .map(|c| match c {
                ':' | '/' | '\\' => '_',
                c if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') => c,
                _ => '-',
            })
            .collect();
        if sanitized.is_empty() {
            "_".to_string()
        } else {
            sanitized
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Names a matrix cell's task for an action kind
pub trait SelectionTaskName {
    fn task_name(&self, kind: &str) -> TaskName;
}

impl SelectionTaskName for Selection<'_> {
    fn task_name(&self, kind: &str) -> TaskName {
        TaskName::for_action(
            kind,
            &self.module.name,
            self.platform,
            self.is_test,
            self.build_type,
        )
    }
}

/// A unit of build work
///
/// Tasks are immutable once registered. Everything they need beyond their
/// constructor arguments arrives through `run`.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable name assigned at construction
    fn name(&self) -> &TaskName;

    /// Action kind the task was registered for, if any (e.g. "compile")
    fn kind(&self) -> Option<&str> {
        None
    }

    /// One-line description shown when the task starts
    fn description(&self) -> String {
        self.name().to_string()
    }

    /// Execute the task. `dependencies` holds one result per declared
    /// dependency, in declaration order.
    async fn run(
        &self,
        dependencies: &DependencyResults,
        ctx: &TaskContext,
    ) -> Result<TaskOutput, TaskFailure>;
}

/// Cause reported by a failing task
#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    /// A required dependency result of some variant was absent or ambiguous
    #[error("expected exactly one {variant} among dependency results, found {found}")]
    UnexpectedDependencies { variant: &'static str, found: usize },

    /// A command exited unsuccessfully
    #[error("command exited with {}: {stderr}", exit_label(.code))]
    CommandFailed { code: Option<i32>, stderr: String },

    /// A command ran longer than allowed
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// A command could not be started
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The build was cancelled while the task was running
    #[error("cancelled")]
    Cancelled,

    /// The task panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Message(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

impl TaskFailure {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

/// A task failure recorded against the task that raised it
#[derive(Debug, Clone, thiserror::Error)]
#[error("task {task} failed: {cause}")]
pub struct TaskExecutionError {
    pub task: TaskName,
    #[source]
    pub cause: Arc<TaskFailure>,
}

/// Everything a running task may use besides its dependency results
pub struct TaskContext {
    name: TaskName,
    output_dir: PathBuf,
    build: Arc<BuildContext>,
    cache: Arc<TaskCache>,
    reporter: Arc<dyn TaskReporter>,
    cancellation: CancellationToken,
    cache_calls: AtomicUsize,
    cache_reused: AtomicUsize,
}

impl TaskContext {
    pub fn new(
        name: TaskName,
        output_dir: PathBuf,
        build: Arc<BuildContext>,
        cache: Arc<TaskCache>,
        reporter: Arc<dyn TaskReporter>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            name,
            output_dir,
            build,
            cache,
            reporter,
            cancellation,
            cache_calls: AtomicUsize::new(0),
            cache_reused: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    /// Task-private output directory; exists when `run` is invoked
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn build(&self) -> &BuildContext {
        &self.build
    }

    pub fn reporter(&self) -> &dyn TaskReporter {
        self.reporter.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Forward one line of task output to the reporter
    pub fn emit_output(&self, line: impl Into<String>, is_stderr: bool) {
        self.reporter.report(&TaskEvent::Output {
            task: self.name.clone(),
            line: line.into(),
            is_stderr,
        });
    }

    /// Run `body` through the change cache, recording whether it was reused
    pub async fn execute_cached<F, Fut>(
        &self,
        identity: &str,
        configuration: &BTreeMap<String, String>,
        inputs: &[PathBuf],
        body: F,
    ) -> Result<ExecutionResult, TaskFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<PathBuf>, TaskFailure>>,
    {
        let result = self
            .cache
            .execute(identity, configuration, inputs, body)
            .await?;
        self.cache_calls.fetch_add(1, Ordering::SeqCst);
        if result.up_to_date {
            self.cache_reused.fetch_add(1, Ordering::SeqCst);
        }
        Ok(result)
    }

    /// `Some(true)` when the task went through the cache and every call was
    /// reused, `None` when the cache was never consulted
    pub fn up_to_date(&self) -> Option<bool> {
        let calls = self.cache_calls.load(Ordering::SeqCst);
        if calls == 0 {
            None
        } else {
            Some(self.cache_reused.load(Ordering::SeqCst) == calls)
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("name", &self.name)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::model::{Module, ProductType};

    #[test]
    fn test_naming_function() {
        let name = TaskName::for_action("compile", "app", Platform::Jvm, false, None);
        assert_eq!(name.as_str(), ":app:compileJvm");

        let name = TaskName::for_action(
            "compile",
            "app",
            Platform::IosArm64,
            true,
            Some(BuildType::Release),
        );
        assert_eq!(name.to_string(), ":app:compileIosArm64TestRelease");
    }

    #[test]
    fn test_naming_is_deterministic() {
        let a = TaskName::for_action("jar", "core", Platform::Android, false, Some(BuildType::Debug));
        let b = TaskName::for_action("jar", "core", Platform::Android, false, Some(BuildType::Debug));
        assert_eq!(a, b);
    }

    #[test]
    fn test_selection_task_name() {
        let module = Module::new("core", ProductType::Lib);
        let sel = Selection {
            module: &module,
            platform: Platform::Jvm,
            is_test: true,
            build_type: None,
        };
        assert_eq!(sel.task_name("compile").as_str(), ":core:compileJvmTest");
        assert_eq!(sel.main_partition().task_name("compile").as_str(), ":core:compileJvm");
    }

    #[test]
    fn test_output_dir_name() {
        let name = TaskName::for_action("compile", "app", Platform::Jvm, false, None);
        assert_eq!(name.output_dir_name(), "app_compileJvm");
        assert_eq!(TaskName::new("setup tools").output_dir_name(), "setup-tools");
        assert_eq!(TaskName::new(":").output_dir_name(), "_");
    }

    #[test]
    fn test_failure_messages() {
        let failure = TaskFailure::UnexpectedDependencies {
            variant: "JarArtifact",
            found: 0,
        };
        assert!(failure.to_string().contains("JarArtifact"));

        let failure = TaskFailure::CommandFailed {
            code: Some(2),
            stderr: "boom".to_string(),
        };
        assert_eq!(failure.to_string(), "command exited with code 2: boom");
    }
}
