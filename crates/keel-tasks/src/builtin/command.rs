//! Task running a project action's shell command through the change cache

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use keel_core::config::{ActionConfig, OutputKind};
use keel_core::model::{BuildType, Platform, Selection};
use keel_core::BuildContext;
use tracing::debug;
use walkdir::WalkDir;

use crate::process::ShellCommand;
use crate::result::{
    CompiledClasses, DependencyResults, FileSet, InstalledTool, JarArtifact, TaskOutput,
};
use crate::task::{Task, TaskContext, TaskFailure, TaskName};

/// One matrix cell of a command action
#[derive(Debug, Clone)]
pub struct CommandTask {
    name: TaskName,
    kind: String,
    module: String,
    module_dir: PathBuf,
    platform: Platform,
    is_test: bool,
    build_type: Option<BuildType>,
    command: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    output: OutputKind,
    env: BTreeMap<String, String>,
    shared_key: Option<String>,
    timeout: Option<Duration>,
}

impl CommandTask {
    pub fn new(
        name: TaskName,
        selection: &Selection<'_>,
        action: &ActionConfig,
        project_root: &Path,
    ) -> Self {
        Self {
            name,
            kind: action.name.clone(),
            module: selection.module.name.clone(),
            module_dir: selection.module.dir(project_root),
            platform: selection.platform,
            is_test: selection.is_test,
            build_type: selection.build_type,
            command: action.command.clone().unwrap_or_default(),
            inputs: action.inputs.clone(),
            outputs: action.outputs.clone(),
            output: action.output,
            env: action.env.clone(),
            shared_key: action.shared_key.clone(),
            timeout: action.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Timeout used when the action does not set its own
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        if self.timeout.is_none() {
            self.timeout = timeout;
        }
        self
    }

    /// Command line with placeholders substituted
    pub fn expand_command(&self, output_dir: &Path) -> String {
        self.command
            .replace("{output}", &output_dir.to_string_lossy())
            .replace("{module_dir}", &self.module_dir.to_string_lossy())
            .replace("{module}", &self.module)
            .replace("{platform}", self.platform.as_str())
            .replace(
                "{build_type}",
                self.build_type.map(|b| b.as_str()).unwrap_or_default(),
            )
    }

    /// Cells sharing a key must agree on their configuration, so cell
    /// coordinates only enter it for unshared tasks.
    fn configuration(&self, ctx: &TaskContext) -> BTreeMap<String, String> {
        let host = ctx.build().host();
        let mut config = BTreeMap::new();
        config.insert("command".to_string(), self.command.clone());
        config.insert("output".to_string(), format!("{:?}", self.output));
        if self.shared_key.is_none() {
            config.insert("platform".to_string(), self.platform.to_string());
            config.insert("test".to_string(), self.is_test.to_string());
            config.insert(
                "build_type".to_string(),
                self.build_type.map(|b| b.to_string()).unwrap_or_default(),
            );
        }
        config.insert("host.os".to_string(), host.os.as_str().to_string());
        config.insert("host.arch".to_string(), host.arch.as_str().to_string());
        for (key, value) in &self.env {
            config.insert(format!("env.{}", key), value.clone());
        }
        config
    }

    /// Declared input files, or every file of the module directory when none
    /// are declared. Build output and cache records never count as inputs.
    fn input_files(&self, build: &BuildContext) -> Result<Vec<PathBuf>, TaskFailure> {
        let excluded = [build.build_root(), build.cache_root()];
        let mut files = if self.inputs.is_empty() {
            module_files(&self.module_dir, &excluded)?
        } else {
            expand_globs(&self.module_dir, &self.inputs)?
        };
        files.retain(|p| p.is_file() && !excluded.iter().any(|root| p.starts_with(root)));
        Ok(files)
    }

    /// Output directory: task-private, or one directory per shared key
    fn output_dir(&self, ctx: &TaskContext) -> PathBuf {
        match &self.shared_key {
            Some(key) => shared_output_dir(ctx.build(), key),
            None => ctx.output_dir().to_path_buf(),
        }
    }

    fn collect_outputs(&self, output_dir: &Path) -> Result<Vec<PathBuf>, TaskFailure> {
        if self.outputs.is_empty() {
            return Ok(vec![output_dir.to_path_buf()]);
        }
        let paths = expand_globs(output_dir, &self.outputs)?;
        if paths.is_empty() {
            return Err(TaskFailure::message(format!(
                "command produced none of the declared outputs: {}",
                self.outputs.join(", ")
            )));
        }
        Ok(paths)
    }

    fn to_output(&self, paths: Vec<PathBuf>, output_dir: &Path) -> TaskOutput {
        let first = paths
            .first()
            .cloned()
            .unwrap_or_else(|| output_dir.to_path_buf());
        match self.output {
            OutputKind::Files | OutputKind::Classpath => TaskOutput::Files(FileSet { paths }),
            OutputKind::Classes => TaskOutput::Classes(CompiledClasses { classes_dir: first }),
            OutputKind::Jar => {
                let path = paths
                    .iter()
                    .find(|p| p.extension().is_some_and(|e| e == "jar"))
                    .cloned()
                    .unwrap_or(first);
                TaskOutput::Jar(JarArtifact { path })
            }
            OutputKind::Tool => TaskOutput::Tool(InstalledTool {
                name: self.kind.clone(),
                home: first,
            }),
        }
    }
}

/// Directory holding the outputs of every cell sharing `key`
fn shared_output_dir(build: &BuildContext, key: &str) -> PathBuf {
    build
        .tasks_root()
        .join("_shared")
        .join(TaskName::new(key).output_dir_name())
}

/// Every file under `dir`, sorted, without descending into `excluded`
fn module_files(dir: &Path, excluded: &[&Path]) -> Result<Vec<PathBuf>, TaskFailure> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !excluded.iter().any(|root| e.path().starts_with(root)));
    for entry in walker {
        let entry = entry.map_err(|e| TaskFailure::Io(e.into()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Expand glob patterns relative to `base`, sorted and deduplicated
fn expand_globs(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, TaskFailure> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let full = base.join(pattern).to_string_lossy().to_string();
        let entries = glob::glob(&full).map_err(|e| {
            TaskFailure::message(format!("invalid glob pattern '{}': {}", pattern, e))
        })?;
        for entry in entries {
            let path = entry.map_err(|e| TaskFailure::Io(e.into_error()))?;
            paths.push(path);
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

#[async_trait]
impl Task for CommandTask {
    fn name(&self) -> &TaskName {
        &self.name
    }

    fn kind(&self) -> Option<&str> {
        Some(&self.kind)
    }

    fn description(&self) -> String {
        self.command.clone()
    }

    async fn run(
        &self,
        dependencies: &DependencyResults,
        ctx: &TaskContext,
    ) -> Result<TaskOutput, TaskFailure> {
        let output_dir = self.output_dir(ctx);
        if self.shared_key.is_some() {
            tokio::fs::create_dir_all(&output_dir).await?;
        }
        let dependency_outputs = dependencies.output_paths();

        let mut inputs = self.input_files(ctx.build())?;
        if self.shared_key.is_none() {
            inputs.extend(dependency_outputs.iter().cloned());
        }

        let identity = self
            .shared_key
            .clone()
            .unwrap_or_else(|| self.name.to_string());
        let configuration = self.configuration(ctx);

        let cwd = if self.module_dir.is_dir() {
            self.module_dir.clone()
        } else {
            ctx.build().project_root().to_path_buf()
        };
        let joined_outputs = std::env::join_paths(&dependency_outputs).unwrap_or_default();

        let command = ShellCommand::new(self.expand_command(&output_dir), cwd)
            .envs(&self.env)
            .env("KEEL_OUTPUT_DIR", &output_dir)
            .env("KEEL_MODULE_DIR", &self.module_dir)
            .env("KEEL_MODULE", &self.module)
            .env("KEEL_PLATFORM", self.platform.as_str())
            .env(
                "KEEL_BUILD_TYPE",
                self.build_type.map(|b| b.as_str()).unwrap_or_default(),
            )
            .env("KEEL_IS_TEST", self.is_test.to_string())
            .env("KEEL_DEPENDENCY_OUTPUTS", joined_outputs)
            .timeout(self.timeout);

        let result = ctx
            .execute_cached(&identity, &configuration, &inputs, || async {
                command
                    .run(&self.name, ctx.reporter(), ctx.cancellation())
                    .await?;
                self.collect_outputs(&output_dir)
            })
            .await?;

        if result.up_to_date {
            debug!(task = %self.name, "command outputs up to date");
        }
        Ok(self.to_output(result.output_paths, &output_dir))
    }
}
