//! Loading the project file and turning it into a task graph

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use keel_core::config::{load_config_from_dir, project_root_of};
use keel_core::{BuildContext, Config, Project};
use keel_tasks::{register_pipeline, GraphError, TaskCache, TaskGraph, TaskGraphBuilder, TaskName};
use tracing::debug;

/// A loaded project: its configuration, root and module model
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub config: Config,
    pub project: Project,
}

impl Workspace {
    /// Load the project enclosing the current directory
    pub fn load() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::load_from(&cwd)
    }

    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let (config, config_path) = load_config_from_dir(dir)?;
        let root = project_root_of(&config_path);
        let project = Project::new(&root, config.modules.clone())
            .with_context(|| format!("invalid modules in {}", config_path.display()))?;
        debug!(root = %root.display(), modules = project.modules().len(), "workspace loaded");
        Ok(Self {
            root,
            config_path,
            config,
            project,
        })
    }

    pub fn context(&self) -> BuildContext {
        BuildContext::from_config(&self.root, &self.config)
    }

    /// Change cache for this project, or a disabled one
    pub fn cache(&self, context: &BuildContext, no_cache: bool) -> TaskCache {
        if no_cache || !self.config.cache.enabled {
            TaskCache::disabled(context.cache_root())
        } else {
            TaskCache::new(context.cache_root())
        }
    }

    /// Register every action and freeze the result
    pub fn task_graph(&self) -> anyhow::Result<TaskGraph> {
        let mut builder = TaskGraphBuilder::new();
        let timeout = self.config.build.task_timeout_secs.map(Duration::from_secs);
        register_pipeline(&mut builder, &self.project, &self.config.actions, timeout)
            .context("failed to register actions")?;
        let graph = builder.build().context("invalid task graph")?;
        Ok(graph)
    }
}

/// Restrict `graph` to `targets` and their dependencies.
///
/// A target is either a task name or an action name standing for every task
/// of that action. No targets keeps the whole graph.
pub fn select_targets(graph: TaskGraph, targets: &[String]) -> Result<TaskGraph, GraphError> {
    if targets.is_empty() {
        return Ok(graph);
    }
    let mut roots: Vec<TaskName> = Vec::new();
    for target in targets {
        let name = TaskName::new(target.as_str());
        if graph.contains(&name) {
            roots.push(name);
            continue;
        }
        let of_kind = graph.tasks_of_kind(target);
        if of_kind.is_empty() {
            return Err(GraphError::UnknownTask(name));
        }
        roots.extend(of_kind);
    }
    graph.closure(&roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
[[modules]]
name = "core"
platforms = ["jvm"]

[[modules]]
name = "app"
type = "jvm-app"
platforms = ["jvm"]
dependencies = [{ module = "core" }]

[[actions]]
name = "compile"
command = "true"
module_dependencies = "compile"

[[actions]]
name = "jar"
command = "true"
output = "jar"
depends_on = ["compile"]

[[actions]]
name = "lint"
command = "true"
"#;

    fn workspace() -> (TempDir, Workspace) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("keel.toml"), PROJECT).unwrap();
        let nested = temp.path().join("app").join("src");
        std::fs::create_dir_all(&nested).unwrap();
        let ws = Workspace::load_from(&nested).unwrap();
        (temp, ws)
    }

    #[test]
    fn test_load_from_nested_directory() {
        let (temp, ws) = workspace();
        assert_eq!(ws.root, temp.path());
        assert_eq!(ws.project.modules().len(), 2);
        assert_eq!(ws.context().build_root(), temp.path().join("build"));
    }

    #[test]
    fn test_select_by_task_name() {
        let (_temp, ws) = workspace();
        let graph = select_targets(ws.task_graph().unwrap(), &[":app:compileJvm".to_string()]).unwrap();
        let names: Vec<_> = graph.sorted().iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec![":core:compileJvm", ":app:compileJvm"]);
    }

    #[test]
    fn test_select_by_action_name() {
        let (_temp, ws) = workspace();
        let graph = select_targets(ws.task_graph().unwrap(), &["jar".to_string()]).unwrap();
        assert_eq!(graph.len(), 4);
        assert!(!graph.contains(&":core:lintJvm".into()));
    }

    #[test]
    fn test_unknown_target() {
        let (_temp, ws) = workspace();
        let err = select_targets(ws.task_graph().unwrap(), &["deploy".to_string()]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownTask(_)));
    }

    #[test]
    fn test_no_targets_keeps_graph() {
        let (_temp, ws) = workspace();
        let graph = select_targets(ws.task_graph().unwrap(), &[]).unwrap();
        assert_eq!(graph.len(), 6);
    }
}
