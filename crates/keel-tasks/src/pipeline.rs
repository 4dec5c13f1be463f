//! Registration of project actions over the build matrix
//!
//! Every action becomes one task per matrix cell it applies to. Edges are
//! wired by constructing the peer's name with the same naming function used
//! at registration, so the peer may be registered before or after.

use std::sync::Arc;
use std::time::Duration;

use keel_core::config::{ActionConfig, OutputKind};
use keel_core::model::{BuildType, MatrixSelector, Module, Project, Selection};
use tracing::{debug, instrument};

use crate::builtin::{ClasspathTask, CommandTask};
use crate::dag::{GraphError, TaskGraphBuilder};
use crate::task::{SelectionTaskName, Task, TaskName};

/// Registers a list of actions for a project
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    project: &'a Project,
    actions: &'a [ActionConfig],
    default_timeout: Option<Duration>,
}

impl<'a> Pipeline<'a> {
    pub fn new(project: &'a Project, actions: &'a [ActionConfig]) -> Self {
        Self {
            project,
            actions,
            default_timeout: None,
        }
    }

    /// Timeout for command actions that do not declare one
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register every action cell and its edges. Returns the number of tasks
    /// registered.
    #[instrument(skip_all, fields(actions = self.actions.len()))]
    pub fn register(&self, builder: &mut TaskGraphBuilder) -> Result<usize, GraphError> {
        let mut registered = 0;
        for action in self.actions {
            let matrix = self.matrix(action);
            for sel in matrix.iter() {
                let name = sel.task_name(&action.name);
                let depends_on = self.peer_names(action, sel)?;
                builder.register_task(self.task_for(name, sel, action), depends_on)?;
                registered += 1;
            }

            if let Some(scope) = action.module_dependencies {
                for (sel, dep_module) in matrix.select_module_dependencies(scope) {
                    if !applies_to(action, dep_module) {
                        continue;
                    }
                    let peer = Selection {
                        is_test: false,
                        ..sel.with_module(dep_module)
                    };
                    builder.register_dependency(
                        sel.task_name(&action.name),
                        peer.task_name(&action.name),
                    );
                }
            }
            debug!(action = %action.name, cells = matrix.len(), "registered action");
        }
        Ok(registered)
    }

    fn matrix(&self, action: &ActionConfig) -> MatrixSelector<'a> {
        let mut matrix = self
            .project
            .all_modules()
            .filter_module_type(|t| action.module_types.is_empty() || action.module_types.contains(&t))
            .also_platforms(&action.platforms);
        if action.tests {
            matrix = matrix.also_tests();
        }
        if action.build_types {
            matrix = matrix.also_build_types();
        }
        matrix
    }

    fn action(&self, name: &str) -> Option<&'a ActionConfig> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Names of the tasks `sel` of `action` depends on within its own module
    fn peer_names(
        &self,
        action: &ActionConfig,
        sel: &Selection<'_>,
    ) -> Result<Vec<TaskName>, GraphError> {
        let mut names = Vec::new();
        for dependency in &action.depends_on {
            let peer = self
                .action(dependency)
                .ok_or_else(|| GraphError::UnknownAction {
                    action: action.name.clone(),
                    dependency: dependency.clone(),
                })?;
            if !applies_to(peer, sel.module)
                || !(peer.platforms.is_empty() || peer.platforms.contains(&sel.platform))
            {
                debug!(action = %action.name, peer = %peer.name, module = %sel.module.name, "peer action not in this cell");
                continue;
            }

            let is_test = sel.is_test && peer.tests;
            let build_types: Vec<Option<BuildType>> = match (peer.build_types, sel.build_type) {
                (false, _) => vec![None],
                (true, Some(bt)) => vec![Some(bt)],
                (true, None) => BuildType::ALL.into_iter().map(Some).collect(),
            };
            for build_type in build_types {
                let peer_sel = Selection {
                    is_test,
                    build_type,
                    ..*sel
                };
                names.push(peer_sel.task_name(&peer.name));
            }
        }

        if sel.is_test {
            names.push(sel.main_partition().task_name(&action.name));
        }
        Ok(names)
    }

    fn task_for(&self, name: TaskName, sel: &Selection<'_>, action: &ActionConfig) -> Arc<dyn Task> {
        match action.output {
            OutputKind::Classpath => Arc::new(ClasspathTask::new(name, action.name.clone())),
            _ => Arc::new(
                CommandTask::new(name, sel, action, self.project.root())
                    .with_default_timeout(self.default_timeout),
            ),
        }
    }
}

fn applies_to(action: &ActionConfig, module: &Module) -> bool {
    action.module_types.is_empty() || action.module_types.contains(&module.product_type)
}

/// Register `actions` for `project` into `builder`
pub fn register_pipeline(
    builder: &mut TaskGraphBuilder,
    project: &Project,
    actions: &[ActionConfig],
    default_timeout: Option<Duration>,
) -> Result<usize, GraphError> {
    Pipeline::new(project, actions)
        .with_default_timeout(default_timeout)
        .register(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::model::{DependencyScope, Platform, ProductType, ResolutionScope};

    fn project(root: &std::path::Path) -> Project {
        Project::new(
            root,
            vec![
                Module::new("core", ProductType::Lib).with_platforms([Platform::Jvm]),
                Module::new("app", ProductType::JvmApp)
                    .with_platforms([Platform::Jvm])
                    .with_dependency("core", DependencyScope::All),
            ],
        )
        .unwrap()
    }

    fn jvm_actions() -> Vec<ActionConfig> {
        vec![
            ActionConfig::new("compile")
                .with_command("mkdir -p {output}/classes && cat src/*.txt > {output}/classes/{module}.class")
                .with_output(OutputKind::Classes)
                .with_inputs(vec!["src/*.txt".to_string()])
                .with_module_dependencies(ResolutionScope::Compile),
            ActionConfig {
                outputs: vec!["*.jar".to_string()],
                ..ActionConfig::new("jar")
                    .with_command("echo jar > {output}/{module}.jar")
                    .with_output(OutputKind::Jar)
                    .with_depends_on("compile")
                    .with_module_dependencies(ResolutionScope::Runtime)
            },
            ActionConfig::new("runtimeClasspath")
                .with_output(OutputKind::Classpath)
                .with_depends_on("jar")
                .with_module_types(vec![ProductType::JvmApp]),
        ]
    }

    fn graph_names(builder: TaskGraphBuilder) -> Vec<String> {
        let graph = builder.build().unwrap();
        graph.sorted().iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_registers_one_task_per_cell() {
        let project = project(std::path::Path::new("/p"));
        let actions = jvm_actions();
        let mut builder = TaskGraphBuilder::new();
        let count = register_pipeline(&mut builder, &project, &actions, None).unwrap();
        // compile and jar for both modules, runtimeClasspath for the app only
        assert_eq!(count, 5);
        assert!(builder.contains(&":app:runtimeClasspathJvm".into()));
        assert!(!builder.contains(&":core:runtimeClasspathJvm".into()));
    }

    #[test]
    fn test_cross_module_and_action_edges() {
        let project = project(std::path::Path::new("/p"));
        let actions = jvm_actions();
        let mut builder = TaskGraphBuilder::new();
        register_pipeline(&mut builder, &project, &actions, None).unwrap();
        let graph = builder.build().unwrap();

        let app_compile = TaskName::new(":app:compileJvm");
        assert_eq!(graph.dependencies_of(&app_compile), &[TaskName::new(":core:compileJvm")]);

        let app_jar = TaskName::new(":app:jarJvm");
        assert_eq!(
            graph.dependencies_of(&app_jar),
            &[app_compile.clone(), TaskName::new(":core:jarJvm")]
        );

        let order = graph.sorted();
        let pos = |n: &str| order.iter().position(|t| t.as_str() == n).unwrap();
        assert!(pos(":core:compileJvm") < pos(":app:compileJvm"));
        assert!(pos(":core:jarJvm") < pos(":app:runtimeClasspathJvm"));
    }

    #[test]
    fn test_tests_and_build_types_expand_matrix() {
        let project = project(std::path::Path::new("/p"));
        let actions = vec![
            ActionConfig::new("compile")
                .with_command("true")
                .with_tests(true)
                .with_build_types(true),
            ActionConfig::new("test")
                .with_command("true")
                .with_depends_on("compile")
                .with_tests(true)
                .with_build_types(true)
                .with_module_types(vec![ProductType::Lib]),
        ];
        let mut builder = TaskGraphBuilder::new();
        let count = register_pipeline(&mut builder, &project, &actions, None).unwrap();
        // compile: 2 modules × 2 partitions × 2 build types, test: 1 × 2 × 2
        assert_eq!(count, 12);

        let graph = builder.build().unwrap();
        assert_eq!(
            graph.dependencies_of(&":core:testJvmTestRelease".into()),
            &[
                TaskName::new(":core:compileJvmTestRelease"),
                TaskName::new(":core:testJvmRelease"),
            ]
        );
        assert_eq!(
            graph.dependencies_of(&":core:compileJvmTestDebug".into()),
            &[TaskName::new(":core:compileJvmDebug")]
        );
    }

    #[test]
    fn test_unknown_action_dependency() {
        let project = project(std::path::Path::new("/p"));
        let actions = vec![ActionConfig::new("jar")
            .with_command("true")
            .with_depends_on("compile")];
        let mut builder = TaskGraphBuilder::new();
        let err = register_pipeline(&mut builder, &project, &actions, None).unwrap_err();
        assert!(matches!(err, GraphError::UnknownAction { .. }));
    }

    #[test]
    fn test_registration_is_deterministic() {
        let project = project(std::path::Path::new("/p"));
        let actions = jvm_actions();

        let mut first = TaskGraphBuilder::new();
        register_pipeline(&mut first, &project, &actions, None).unwrap();
        let mut second = TaskGraphBuilder::new();
        register_pipeline(&mut second, &project, &actions, None).unwrap();

        assert_eq!(graph_names(first), graph_names(second));
    }

    #[cfg(unix)]
    async fn run_build(
        root: &std::path::Path,
        project: &Project,
        actions: &[ActionConfig],
    ) -> crate::scheduler::BuildReport {
        use crate::cache::TaskCache;
        use crate::reporter::CollectingReporter;
        use crate::scheduler::TaskExecutor;
        use keel_core::BuildContext;

        let mut builder = TaskGraphBuilder::new();
        register_pipeline(&mut builder, project, actions, None).unwrap();
        let graph = builder.build().unwrap();
        let context = Arc::new(BuildContext::new(root));
        let cache = Arc::new(TaskCache::new(context.cache_root()));
        TaskExecutor::new(context, cache, Arc::new(CollectingReporter::default()))
            .execute(&graph)
            .await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_build_reuses_every_task() {
        use crate::result::RuntimeClasspath;
        use crate::scheduler::TaskStatus;

        let temp = tempfile::TempDir::new().unwrap();
        for module in ["core", "app"] {
            let src = temp.path().join(module).join("src");
            std::fs::create_dir_all(&src).unwrap();
            std::fs::write(src.join("Main.txt"), format!("{} sources", module)).unwrap();
        }
        let project = project(temp.path());
        let actions = jvm_actions();

        let first = run_build(temp.path(), &project, &actions).await;
        assert!(first.is_success(), "{:?}", first.failures());
        assert_eq!(first.completed(), 5);

        let classpath = first
            .result(&":app:runtimeClasspathJvm".into())
            .unwrap()
            .get::<RuntimeClasspath>()
            .unwrap()
            .clone();
        assert_eq!(classpath.entries.len(), 2);
        assert!(classpath.entries[0].ends_with("app.jar"));
        assert!(classpath.entries[1].ends_with("core.jar"));

        let second = run_build(temp.path(), &project, &actions).await;
        assert_eq!(second.skipped(), 5, "{:?}", second.statuses);
        assert!(second
            .statuses
            .values()
            .all(|s| *s == TaskStatus::Skipped));

        std::fs::write(temp.path().join("app/src/Main.txt"), "changed").unwrap();
        let third = run_build(temp.path(), &project, &actions).await;
        assert_eq!(third.status(&":core:compileJvm".into()), Some(&TaskStatus::Skipped));
        assert_eq!(third.status(&":core:jarJvm".into()), Some(&TaskStatus::Skipped));
        assert_eq!(third.status(&":app:compileJvm".into()), Some(&TaskStatus::Completed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shared_key_cells_reuse_one_record() {
        use crate::scheduler::TaskStatus;

        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("core")).unwrap();
        let project = Project::new(
            temp.path(),
            vec![Module::new("core", ProductType::Lib)
                .with_platforms([Platform::Jvm, Platform::Android])],
        )
        .unwrap();
        let actions = vec![ActionConfig::new("sdk")
            .with_command("echo {platform} >> {output}/runs.txt")
            .with_shared_key("android-sdk")];

        let first = run_build(temp.path(), &project, &actions).await;
        assert!(first.is_success(), "{:?}", first.failures());
        assert_eq!(first.completed(), 1, "{:?}", first.statuses);
        assert_eq!(first.skipped(), 1, "{:?}", first.statuses);

        let jvm = first.result(&":core:sdkJvm".into()).unwrap().output_paths();
        let android = first.result(&":core:sdkAndroid".into()).unwrap().output_paths();
        assert_eq!(jvm, android);

        for _ in 0..2 {
            let next = run_build(temp.path(), &project, &actions).await;
            assert_eq!(next.skipped(), 2, "{:?}", next.statuses);
            assert!(next.statuses.values().all(|s| *s == TaskStatus::Skipped));
        }

        let runs = std::fs::read_to_string(jvm[0].join("runs.txt")).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_root_module_ignores_build_output() {
        use crate::scheduler::TaskStatus;

        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("Main.txt"), "root sources").unwrap();
        let project = Project::new(
            temp.path(),
            vec![Module::new("root", ProductType::Lib)
                .with_platforms([Platform::Jvm])
                .with_path(".")],
        )
        .unwrap();
        let actions = vec![ActionConfig::new("compile").with_command("cat Main.txt > {output}/out.txt")];
        let name: TaskName = ":root:compileJvm".into();

        let first = run_build(temp.path(), &project, &actions).await;
        assert_eq!(first.status(&name), Some(&TaskStatus::Completed));
        for _ in 0..2 {
            let next = run_build(temp.path(), &project, &actions).await;
            assert_eq!(next.status(&name), Some(&TaskStatus::Skipped));
        }

        std::fs::write(temp.path().join("Main.txt"), "changed").unwrap();
        let changed = run_build(temp.path(), &project, &actions).await;
        assert_eq!(changed.status(&name), Some(&TaskStatus::Completed));
    }
}
