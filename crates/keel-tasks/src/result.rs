//! Typed task results and dependency lookups
//!
//! Every task produces one [`TaskOutput`] variant. The engine wraps it into a
//! [`TaskResult`] that also carries the results of the task's direct
//! dependencies, so consumers can walk upstream artifacts transitively.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::task::{TaskFailure, TaskName};

/// Arbitrary set of produced files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    pub paths: Vec<PathBuf>,
}

/// Directory of compiled classes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledClasses {
    pub classes_dir: PathBuf,
}

/// Packaged archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarArtifact {
    pub path: PathBuf,
}

/// Ordered runtime classpath, also written to `file`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeClasspath {
    pub entries: Vec<PathBuf>,
    pub file: PathBuf,
}

/// Installed tool or SDK component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTool {
    pub name: String,
    pub home: PathBuf,
}

/// What a task produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TaskOutput {
    #[default]
    None,
    Files(FileSet),
    Classes(CompiledClasses),
    Jar(JarArtifact),
    Classpath(RuntimeClasspath),
    Tool(InstalledTool),
}

impl TaskOutput {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Files(_) => FileSet::NAME,
            Self::Classes(_) => CompiledClasses::NAME,
            Self::Jar(_) => JarArtifact::NAME,
            Self::Classpath(_) => RuntimeClasspath::NAME,
            Self::Tool(_) => InstalledTool::NAME,
        }
    }

    /// File-system paths produced
    pub fn paths(&self) -> Vec<PathBuf> {
        match self {
            Self::None => Vec::new(),
            Self::Files(set) => set.paths.clone(),
            Self::Classes(classes) => vec![classes.classes_dir.clone()],
            Self::Jar(jar) => vec![jar.path.clone()],
            Self::Classpath(cp) => vec![cp.file.clone()],
            Self::Tool(tool) => vec![tool.home.clone()],
        }
    }
}

/// A concrete result variant that can be picked out of a [`TaskOutput`]
pub trait ResultVariant {
    const NAME: &'static str;

    fn from_output(output: &TaskOutput) -> Option<&Self>;
}

impl ResultVariant for FileSet {
    const NAME: &'static str = "FileSet";

    fn from_output(output: &TaskOutput) -> Option<&Self> {
        match output {
            TaskOutput::Files(v) => Some(v),
            _ => None,
        }
    }
}

impl ResultVariant for CompiledClasses {
    const NAME: &'static str = "CompiledClasses";

    fn from_output(output: &TaskOutput) -> Option<&Self> {
        match output {
            TaskOutput::Classes(v) => Some(v),
            _ => None,
        }
    }
}

impl ResultVariant for JarArtifact {
    const NAME: &'static str = "JarArtifact";

    fn from_output(output: &TaskOutput) -> Option<&Self> {
        match output {
            TaskOutput::Jar(v) => Some(v),
            _ => None,
        }
    }
}

impl ResultVariant for RuntimeClasspath {
    const NAME: &'static str = "RuntimeClasspath";

    fn from_output(output: &TaskOutput) -> Option<&Self> {
        match output {
            TaskOutput::Classpath(v) => Some(v),
            _ => None,
        }
    }
}

impl ResultVariant for InstalledTool {
    const NAME: &'static str = "InstalledTool";

    fn from_output(output: &TaskOutput) -> Option<&Self> {
        match output {
            TaskOutput::Tool(v) => Some(v),
            _ => None,
        }
    }
}

/// Output of one task execution, shared read-only with its dependents
#[derive(Debug, Clone)]
pub struct TaskResult {
    task: TaskName,
    output: TaskOutput,
    dependencies: Vec<Arc<TaskResult>>,
}

impl TaskResult {
    pub fn new(task: TaskName, output: TaskOutput, dependencies: Vec<Arc<TaskResult>>) -> Self {
        Self {
            task,
            output,
            dependencies,
        }
    }

    pub fn task(&self) -> &TaskName {
        &self.task
    }

    pub fn output(&self) -> &TaskOutput {
        &self.output
    }

    /// Results of the direct dependencies, in declaration order
    pub fn dependencies(&self) -> &[Arc<TaskResult>] {
        &self.dependencies
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.output.paths()
    }

    pub fn get<V: ResultVariant>(&self) -> Option<&V> {
        V::from_output(&self.output)
    }

    /// This result and everything upstream of it, depth first in declaration
    /// order, each task visited once
    pub fn transitive<V: ResultVariant>(&self) -> Vec<&V> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        collect_transitive(self, &mut seen, &mut found);
        found
    }
}

fn collect_transitive<'a, V: ResultVariant>(
    result: &'a TaskResult,
    seen: &mut HashSet<&'a TaskName>,
    found: &mut Vec<&'a V>,
) {
    if !seen.insert(&result.task) {
        return;
    }
    if let Some(v) = result.get::<V>() {
        found.push(v);
    }
    for dep in &result.dependencies {
        collect_transitive(dep, seen, found);
    }
}

/// Results handed to a task's `run`, one per declared dependency
#[derive(Debug, Clone, Default)]
pub struct DependencyResults {
    results: Vec<Arc<TaskResult>>,
}

impl DependencyResults {
    pub fn new(results: Vec<Arc<TaskResult>>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TaskResult>> {
        self.results.iter()
    }

    pub fn as_slice(&self) -> &[Arc<TaskResult>] {
        &self.results
    }

    /// Every direct dependency result of variant `V`
    pub fn all<V: ResultVariant>(&self) -> Vec<&V> {
        self.results.iter().filter_map(|r| r.get::<V>()).collect()
    }

    /// Zero or one direct result of variant `V`; more than one is an error
    pub fn find_single<V: ResultVariant>(&self) -> Result<Option<&V>, TaskFailure> {
        let matches = self.all::<V>();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            found => Err(TaskFailure::UnexpectedDependencies {
                variant: V::NAME,
                found,
            }),
        }
    }

    /// Exactly one direct result of variant `V`
    pub fn require_single<V: ResultVariant>(&self) -> Result<&V, TaskFailure> {
        let matches = self.all::<V>();
        if matches.len() != 1 {
            return Err(TaskFailure::UnexpectedDependencies {
                variant: V::NAME,
                found: matches.len(),
            });
        }
        Ok(matches[0])
    }

    /// Variant `V` across all dependencies and their upstream results
    pub fn transitive<V: ResultVariant>(&self) -> Vec<&V> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for result in &self.results {
            collect_transitive(result, &mut seen, &mut found);
        }
        found
    }

    /// Output paths of every direct dependency, in declaration order
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.results.iter().flat_map(|r| r.output_paths()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar(name: &str, deps: Vec<Arc<TaskResult>>) -> Arc<TaskResult> {
        Arc::new(TaskResult::new(
            TaskName::new(name),
            TaskOutput::Jar(JarArtifact {
                path: PathBuf::from(format!("/out/{}.jar", name)),
            }),
            deps,
        ))
    }

    fn classes(name: &str) -> Arc<TaskResult> {
        Arc::new(TaskResult::new(
            TaskName::new(name),
            TaskOutput::Classes(CompiledClasses {
                classes_dir: PathBuf::from(format!("/out/{}", name)),
            }),
            Vec::new(),
        ))
    }

    #[test]
    fn test_require_single() {
        let deps = DependencyResults::new(vec![classes("compile"), jar("jar", Vec::new())]);
        let jar = deps.require_single::<JarArtifact>().unwrap();
        assert_eq!(jar.path, PathBuf::from("/out/jar.jar"));
    }

    #[test]
    fn test_require_single_fails_fast() {
        let deps = DependencyResults::new(vec![classes("compile")]);
        assert!(matches!(
            deps.require_single::<JarArtifact>(),
            Err(TaskFailure::UnexpectedDependencies { variant: "JarArtifact", found: 0 })
        ));

        let deps = DependencyResults::new(vec![jar("a", Vec::new()), jar("b", Vec::new())]);
        assert!(matches!(
            deps.require_single::<JarArtifact>(),
            Err(TaskFailure::UnexpectedDependencies { found: 2, .. })
        ));
    }

    #[test]
    fn test_find_single() {
        let deps = DependencyResults::new(vec![classes("compile")]);
        assert!(deps.find_single::<InstalledTool>().unwrap().is_none());
        assert!(deps.find_single::<CompiledClasses>().unwrap().is_some());
    }

    #[test]
    fn test_transitive_dedupes_diamond() {
        let base = jar("base", Vec::new());
        let left = jar("left", vec![base.clone()]);
        let right = jar("right", vec![base.clone()]);
        let deps = DependencyResults::new(vec![left, right]);

        let paths: Vec<_> = deps
            .transitive::<JarArtifact>()
            .into_iter()
            .map(|j| j.path.clone())
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/out/left.jar"),
                PathBuf::from("/out/base.jar"),
                PathBuf::from("/out/right.jar"),
            ]
        );
    }

    #[test]
    fn test_result_transitive_includes_self() {
        let base = jar("base", Vec::new());
        let top = jar("top", vec![base]);
        assert_eq!(top.transitive::<JarArtifact>().len(), 2);
        assert!(top.transitive::<CompiledClasses>().is_empty());
    }

    #[test]
    fn test_output_paths() {
        let deps = DependencyResults::new(vec![classes("compile"), jar("jar", Vec::new())]);
        assert_eq!(
            deps.output_paths(),
            vec![PathBuf::from("/out/compile"), PathBuf::from("/out/jar.jar")]
        );
        assert_eq!(TaskOutput::None.variant_name(), "None");
    }
}
