//! Task graph construction and management
//!
//! Tasks and edges are declared on a [`TaskGraphBuilder`] in any order. Edges
//! may name tasks that are registered later; everything is checked once in
//! [`TaskGraphBuilder::build`], which freezes the declarations into an
//! immutable [`TaskGraph`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info, instrument};

use crate::task::{Task, TaskName};

/// Accumulates task registrations and dependency edges
#[derive(Default)]
pub struct TaskGraphBuilder {
    tasks: IndexMap<TaskName, Arc<dyn Task>>,
    edges: IndexMap<TaskName, IndexSet<TaskName>>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and the tasks it depends on. The dependencies need not
    /// be registered yet.
    pub fn register_task(
        &mut self,
        task: Arc<dyn Task>,
        depends_on: impl IntoIterator<Item = TaskName>,
    ) -> Result<(), GraphError> {
        let name = task.name().clone();
        if self.tasks.contains_key(&name) {
            return Err(GraphError::DuplicateTask(name));
        }
        debug!(task = %name, "registering task");
        self.tasks.insert(name.clone(), task);
        let edges = self.edges.entry(name).or_default();
        edges.extend(depends_on);
        Ok(())
    }

    /// Add an edge `name -> depends_on`; either side may be registered later
    pub fn register_dependency(&mut self, name: TaskName, depends_on: TaskName) {
        self.edges.entry(name).or_default().insert(depends_on);
    }

    pub fn contains(&self, name: &TaskName) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate the declarations and freeze them into a graph
    #[instrument(skip_all, fields(tasks = self.tasks.len()))]
    pub fn build(self) -> Result<TaskGraph, GraphError> {
        for (from, targets) in &self.edges {
            for to in targets {
                for endpoint in [from, to] {
                    if !self.tasks.contains_key(endpoint) {
                        return Err(GraphError::UnresolvedTaskReference {
                            missing: endpoint.clone(),
                            from: from.clone(),
                            to: to.clone(),
                        });
                    }
                }
            }
        }

        let mut output_dirs: HashMap<String, &TaskName> = HashMap::new();
        for name in self.tasks.keys() {
            if let Some(existing) = output_dirs.insert(name.output_dir_name(), name) {
                return Err(GraphError::OutputDirectoryConflict {
                    first: existing.clone(),
                    second: name.clone(),
                });
            }
        }

        let graph = TaskGraph::assemble(self.tasks, self.edges)?;
        info!(
            task_count = graph.len(),
            wave_count = graph.waves().len(),
            "task graph built"
        );
        Ok(graph)
    }
}

/// A node in the task graph
pub struct TaskNode {
    pub name: TaskName,
    pub task: Arc<dyn Task>,
    /// Tasks that must complete before this one, in declaration order
    pub dependencies: Vec<TaskName>,
    /// Tasks waiting on this one
    pub dependents: Vec<TaskName>,
    /// Execution wave (length of the longest dependency chain below)
    pub wave: usize,
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("wave", &self.wave)
            .finish()
    }
}

/// Immutable, validated, acyclic task graph
#[derive(Debug)]
pub struct TaskGraph {
    /// All nodes, in registration order
    nodes: IndexMap<TaskName, TaskNode>,
    /// Tasks grouped by execution wave (wave 0 runs first, then wave 1, etc.)
    waves: Vec<Vec<TaskName>>,
    /// Topologically sorted task order
    sorted_order: Vec<TaskName>,
}

impl TaskGraph {
    fn assemble(
        tasks: IndexMap<TaskName, Arc<dyn Task>>,
        edges: IndexMap<TaskName, IndexSet<TaskName>>,
    ) -> Result<Self, GraphError> {
        let mut nodes: IndexMap<TaskName, TaskNode> = tasks
            .into_iter()
            .map(|(name, task)| {
                let dependencies = edges
                    .get(&name)
                    .map(|deps| deps.iter().cloned().collect())
                    .unwrap_or_default();
                let node = TaskNode {
                    name: name.clone(),
                    task,
                    dependencies,
                    dependents: Vec::new(),
                    wave: 0,
                };
                (name, node)
            })
            .collect();

        let reverse: Vec<(TaskName, TaskName)> = nodes
            .values()
            .flat_map(|n| n.dependencies.iter().map(|d| (d.clone(), n.name.clone())))
            .collect();
        for (dependency, dependent) in reverse {
            if let Some(node) = nodes.get_mut(&dependency) {
                node.dependents.push(dependent);
            }
        }

        let sorted_order = Self::topological_sort(&nodes)?;
        let waves = Self::compute_waves(&nodes, &sorted_order);

        for (wave_idx, wave_tasks) in waves.iter().enumerate() {
            for name in wave_tasks {
                if let Some(node) = nodes.get_mut(name) {
                    node.wave = wave_idx;
                }
            }
        }

        Ok(Self {
            nodes,
            waves,
            sorted_order,
        })
    }

    /// Topological sort using Kahn's algorithm, ties broken by registration
    /// order
    fn topological_sort(nodes: &IndexMap<TaskName, TaskNode>) -> Result<Vec<TaskName>, GraphError> {
        let mut in_degree: HashMap<&TaskName, usize> = HashMap::new();
        let mut queue: VecDeque<&TaskName> = VecDeque::new();
        let mut sorted: Vec<TaskName> = Vec::with_capacity(nodes.len());

        for (name, node) in nodes {
            in_degree.insert(name, node.dependencies.len());
            if node.dependencies.is_empty() {
                queue.push_back(name);
            }
        }

        while let Some(name) = queue.pop_front() {
            sorted.push(name.clone());

            if let Some(node) = nodes.get(name) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        if sorted.len() != nodes.len() {
            let in_sorted: HashSet<&TaskName> = sorted.iter().collect();
            let cycle = Self::find_cycle(nodes, &in_sorted);
            return Err(GraphError::CyclicDependency { cycle });
        }

        Ok(sorted)
    }

    /// Every node Kahn's algorithm left behind still has a dependency among
    /// the leftovers, so following first such dependencies must revisit a
    /// node. The revisited stretch is the cycle.
    fn find_cycle(
        nodes: &IndexMap<TaskName, TaskNode>,
        in_sorted: &HashSet<&TaskName>,
    ) -> Vec<TaskName> {
        let Some(start) = nodes.keys().find(|n| !in_sorted.contains(n)) else {
            return Vec::new();
        };

        let mut path: Vec<&TaskName> = Vec::new();
        let mut position: HashMap<&TaskName, usize> = HashMap::new();
        let mut current = start;

        loop {
            if let Some(&idx) = position.get(current) {
                return path[idx..].iter().map(|n| (*n).clone()).collect();
            }
            position.insert(current, path.len());
            path.push(current);

            let next = nodes
                .get(current)
                .and_then(|node| node.dependencies.iter().find(|d| !in_sorted.contains(d)));
            match next {
                Some(next) => current = next,
                None => return path.into_iter().cloned().collect(),
            }
        }
    }

    /// Compute execution waves (groups of tasks that can run in parallel)
    fn compute_waves(
        nodes: &IndexMap<TaskName, TaskNode>,
        sorted: &[TaskName],
    ) -> Vec<Vec<TaskName>> {
        let mut wave_map: HashMap<&TaskName, usize> = HashMap::new();

        for name in sorted {
            if let Some(node) = nodes.get(name) {
                let wave = node
                    .dependencies
                    .iter()
                    .filter_map(|dep| wave_map.get(dep))
                    .max()
                    .map(|w| w + 1)
                    .unwrap_or(0);
                wave_map.insert(name, wave);
            }
        }

        if wave_map.is_empty() {
            return Vec::new();
        }

        let max_wave = wave_map.values().max().copied().unwrap_or(0);
        let mut waves: Vec<Vec<TaskName>> = vec![Vec::new(); max_wave + 1];
        for name in sorted {
            if let Some(&wave) = wave_map.get(name) {
                waves[wave].push(name.clone());
            }
        }
        waves
    }

    /// Sub-graph containing `roots` and everything they transitively depend on
    pub fn closure<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a TaskName>,
    ) -> Result<TaskGraph, GraphError> {
        let mut keep: HashSet<&TaskName> = HashSet::new();
        let mut stack: Vec<&TaskName> = Vec::new();
        for root in roots {
            let node = self
                .nodes
                .get(root)
                .ok_or_else(|| GraphError::UnknownTask(root.clone()))?;
            stack.push(&node.name);
        }

        while let Some(name) = stack.pop() {
            if !keep.insert(name) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                stack.extend(node.dependencies.iter());
            }
        }

        let tasks: IndexMap<TaskName, Arc<dyn Task>> = self
            .nodes
            .values()
            .filter(|n| keep.contains(&n.name))
            .map(|n| (n.name.clone(), n.task.clone()))
            .collect();
        let edges: IndexMap<TaskName, IndexSet<TaskName>> = self
            .nodes
            .values()
            .filter(|n| keep.contains(&n.name))
            .map(|n| (n.name.clone(), n.dependencies.iter().cloned().collect()))
            .collect();

        Self::assemble(tasks, edges)
    }

    /// Get all task nodes, in registration order
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    /// Get a specific task node
    pub fn get(&self, name: &TaskName) -> Option<&TaskNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &TaskName) -> bool {
        self.nodes.contains_key(name)
    }

    /// Position of a task in registration order
    pub fn index_of(&self, name: &TaskName) -> Option<usize> {
        self.nodes.get_index_of(name)
    }

    /// Node at a registration-order position
    pub fn node_at(&self, index: usize) -> Option<&TaskNode> {
        self.nodes.get_index(index).map(|(_, node)| node)
    }

    pub fn dependencies_of(&self, name: &TaskName) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, name: &TaskName) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or_default()
    }

    /// Names of tasks registered for an action kind, in registration order
    pub fn tasks_of_kind(&self, kind: &str) -> Vec<TaskName> {
        self.nodes
            .values()
            .filter(|n| n.task.kind() == Some(kind))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Get execution waves
    pub fn waves(&self) -> &[Vec<TaskName>] {
        &self.waves
    }

    /// Get topologically sorted order
    pub fn sorted(&self) -> &[TaskName] {
        &self.sorted_order
    }

    /// Get the total number of tasks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get a human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves.iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for name in wave {
                if let Some(node) = self.nodes.get(name) {
                    let description = node.task.description();
                    if node.dependencies.is_empty() {
                        plan.push_str(&format!("  {} -> {}\n", name, description));
                    } else {
                        let deps: Vec<&str> =
                            node.dependencies.iter().map(|d| d.as_str()).collect();
                        plan.push_str(&format!(
                            "  {} -> {} (after: {})\n",
                            name,
                            description,
                            deps.join(", ")
                        ));
                    }
                }
            }
        }
        plan
    }
}

fn format_cycle(cycle: &[TaskName]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(|n| n.as_str()).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

/// Errors during graph construction
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A task name was registered twice
    #[error("Task '{0}' is registered more than once")]
    DuplicateTask(TaskName),

    /// An edge names a task that was never registered
    #[error("Dependency {from} -> {to} references unregistered task '{missing}'")]
    UnresolvedTaskReference {
        missing: TaskName,
        from: TaskName,
        to: TaskName,
    },

    /// The dependency relation contains a cycle
    #[error("Cyclic dependency detected: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<TaskName> },

    /// Two task names map to the same output directory
    #[error("Tasks '{first}' and '{second}' would share an output directory")]
    OutputDirectoryConflict { first: TaskName, second: TaskName },

    /// A requested task does not exist in the graph
    #[error("Unknown task '{0}'")]
    UnknownTask(TaskName),

    /// An action depends on an action that is not declared
    #[error("Action '{action}' depends on unknown action '{dependency}'")]
    UnknownAction { action: String, dependency: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{DependencyResults, TaskOutput};
    use crate::task::{TaskContext, TaskFailure};
    use async_trait::async_trait;

    struct NoopTask {
        name: TaskName,
    }

    #[async_trait]
    impl Task for NoopTask {
        fn name(&self) -> &TaskName {
            &self.name
        }

        async fn run(
            &self,
            _dependencies: &DependencyResults,
            _ctx: &TaskContext,
        ) -> Result<TaskOutput, TaskFailure> {
            Ok(TaskOutput::None)
        }
    }

    fn noop(name: &str) -> Arc<dyn Task> {
        Arc::new(NoopTask {
            name: TaskName::new(name),
        })
    }

    fn names(list: &[&str]) -> Vec<TaskName> {
        list.iter().map(|n| TaskName::new(*n)).collect()
    }

    /// compile -> jar -> runtimeClasspath, plus an independent lint
    fn chain() -> TaskGraph {
        let mut builder = TaskGraphBuilder::new();
        builder
            .register_task(noop("runtimeClasspath"), names(&["jar"]))
            .unwrap();
        builder.register_task(noop("jar"), names(&["compile"])).unwrap();
        builder.register_task(noop("compile"), []).unwrap();
        builder.register_task(noop("lint"), []).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_build_contains_registered_nodes_and_edges() {
        let graph = chain();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.dependencies_of(&"jar".into()), names(&["compile"]).as_slice());
        assert_eq!(graph.dependents_of(&"jar".into()), names(&["runtimeClasspath"]).as_slice());
        assert!(graph.dependencies_of(&"lint".into()).is_empty());
    }

    #[test]
    fn test_sorted_respects_dependencies() {
        let graph = chain();
        let sorted = graph.sorted();
        let pos = |n: &str| sorted.iter().position(|s| s.as_str() == n).unwrap();
        assert!(pos("compile") < pos("jar"));
        assert!(pos("jar") < pos("runtimeClasspath"));
    }

    #[test]
    fn test_waves() {
        let graph = chain();
        assert_eq!(graph.waves().len(), 3);
        assert_eq!(graph.waves()[0], names(&["compile", "lint"]));
        assert_eq!(graph.get(&"runtimeClasspath".into()).unwrap().wave, 2);
    }

    #[test]
    fn test_dependency_registered_before_either_side() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_dependency("b".into(), "a".into());
        builder.register_task(noop("b"), []).unwrap();
        builder.register_task(noop("a"), []).unwrap();
        let graph = builder.build().unwrap();
        assert_eq!(graph.dependencies_of(&"b".into()), names(&["a"]).as_slice());
    }

    #[test]
    fn test_duplicate_task() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(noop("a"), []).unwrap();
        let err = builder.register_task(noop("a"), []).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTask(name) if name.as_str() == "a"));
        // the builder stays usable
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_unresolved_reference() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(noop("a"), names(&["missing"])).unwrap();
        let err = builder.build().unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnresolvedTaskReference { missing, .. } if missing.as_str() == "missing"
        ));
    }

    #[test]
    fn test_unresolved_edge_source() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(noop("a"), []).unwrap();
        builder.register_dependency("ghost".into(), "a".into());
        assert!(matches!(
            builder.build(),
            Err(GraphError::UnresolvedTaskReference { missing, .. }) if missing.as_str() == "ghost"
        ));
    }

    #[test]
    fn test_cycle_is_named() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(noop("A"), names(&["B"])).unwrap();
        builder.register_task(noop("B"), names(&["C"])).unwrap();
        builder.register_task(noop("C"), names(&["A"])).unwrap();
        builder.register_task(noop("D"), names(&["A"])).unwrap();

        let err = builder.build().unwrap_err();
        match &err {
            GraphError::CyclicDependency { cycle } => assert_eq!(cycle, &names(&["A", "B", "C"])),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(err.to_string(), "Cyclic dependency detected: A -> B -> C -> A");
    }

    #[test]
    fn test_self_cycle() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(noop("A"), names(&["A"])).unwrap();
        assert!(matches!(
            builder.build(),
            Err(GraphError::CyclicDependency { cycle }) if cycle == names(&["A"])
        ));
    }

    #[test]
    fn test_output_directory_conflict() {
        let mut builder = TaskGraphBuilder::new();
        builder.register_task(noop(":app:jar"), []).unwrap();
        builder.register_task(noop("app_jar"), []).unwrap();
        assert!(matches!(
            builder.build(),
            Err(GraphError::OutputDirectoryConflict { .. })
        ));
    }

    #[test]
    fn test_closure() {
        let graph = chain();
        let sub = graph.closure([&TaskName::new("jar")]).unwrap();
        assert_eq!(sub.len(), 2);
        assert!(sub.contains(&"compile".into()));
        assert!(!sub.contains(&"lint".into()));
        assert!(sub.dependents_of(&"jar".into()).is_empty());

        assert!(matches!(
            graph.closure([&TaskName::new("nope")]),
            Err(GraphError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_execution_plan_output() {
        let graph = chain();
        let plan = graph.execution_plan();
        assert!(plan.contains("Wave 0"));
        assert!(plan.contains("jar -> jar (after: compile)"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = TaskGraphBuilder::new().build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.waves().is_empty());
    }
}
