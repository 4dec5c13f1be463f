//! Keel Tasks - task graph construction and incremental execution
//!
//! Tasks are registered into a [`TaskGraphBuilder`], frozen into a
//! [`TaskGraph`], and run by the [`TaskExecutor`] with bounded parallelism.
//! Tasks skip work that is already up to date through the [`TaskCache`] and
//! hand typed [`TaskResult`]s to their dependents.

pub mod builtin;
pub mod cache;
pub mod dag;
pub mod pipeline;
pub mod process;
pub mod reporter;
pub mod result;
pub mod scheduler;
pub mod task;

pub use cache::{CacheError, CacheStats, ExecutionResult, Fingerprint, PruneStats, TaskCache};
pub use dag::{GraphError, TaskGraph, TaskGraphBuilder, TaskNode};
pub use pipeline::{register_pipeline, Pipeline};
pub use reporter::{
    CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter,
};
pub use result::{
    CompiledClasses, DependencyResults, FileSet, InstalledTool, JarArtifact, ResultVariant,
    RuntimeClasspath, TaskOutput, TaskResult,
};
pub use scheduler::{BuildError, BuildReport, ExecutorOptions, TaskExecutor, TaskStatus};
pub use task::{
    SelectionTaskName, Task, TaskContext, TaskExecutionError, TaskFailure, TaskName,
};
