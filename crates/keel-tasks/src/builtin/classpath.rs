//! Runtime classpath assembled from upstream compilation and packaging results

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::result::{CompiledClasses, DependencyResults, JarArtifact, RuntimeClasspath, TaskOutput};
use crate::task::{Task, TaskContext, TaskFailure, TaskName};

const CLASSPATH_FILE: &str = "classpath.txt";

/// Collects classes of direct dependencies and every upstream jar
#[derive(Debug, Clone)]
pub struct ClasspathTask {
    name: TaskName,
    kind: String,
}

impl ClasspathTask {
    pub fn new(name: TaskName, kind: impl Into<String>) -> Self {
        Self {
            name,
            kind: kind.into(),
        }
    }

    /// Direct class directories first, then jars in upstream walk order
    pub fn entries(dependencies: &DependencyResults) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = Vec::new();
        let classes = dependencies
            .all::<CompiledClasses>()
            .into_iter()
            .map(|c| c.classes_dir.clone());
        let jars = dependencies
            .transitive::<JarArtifact>()
            .into_iter()
            .map(|j| j.path.clone());
        for entry in classes.chain(jars) {
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        entries
    }
}

#[async_trait]
impl Task for ClasspathTask {
    fn name(&self) -> &TaskName {
        &self.name
    }

    fn kind(&self) -> Option<&str> {
        Some(&self.kind)
    }

    fn description(&self) -> String {
        "assemble runtime classpath".to_string()
    }

    async fn run(
        &self,
        dependencies: &DependencyResults,
        ctx: &TaskContext,
    ) -> Result<TaskOutput, TaskFailure> {
        let entries = Self::entries(dependencies);
        let file = ctx.output_dir().join(CLASSPATH_FILE);

        let joined = entries
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("\n");
        let mut configuration = BTreeMap::new();
        configuration.insert("entries".to_string(), joined.clone());

        let result = ctx
            .execute_cached(self.name.as_str(), &configuration, &entries, || async {
                tokio::fs::write(&file, joined.as_bytes()).await?;
                Ok::<_, TaskFailure>(vec![file.clone()])
            })
            .await?;

        let file = result.output_paths.into_iter().next().unwrap_or(file);
        Ok(TaskOutput::Classpath(RuntimeClasspath { entries, file }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TaskResult;
    use std::sync::Arc;

    #[test]
    fn test_entries_order_and_dedup() {
        let core_jar = Arc::new(TaskResult::new(
            TaskName::new(":core:jarJvm"),
            TaskOutput::Jar(JarArtifact {
                path: PathBuf::from("/t/core.jar"),
            }),
            Vec::new(),
        ));
        let app_classes = Arc::new(TaskResult::new(
            TaskName::new(":app:compileJvm"),
            TaskOutput::Classes(CompiledClasses {
                classes_dir: PathBuf::from("/t/app/classes"),
            }),
            Vec::new(),
        ));
        let app_jar = Arc::new(TaskResult::new(
            TaskName::new(":app:jarJvm"),
            TaskOutput::Jar(JarArtifact {
                path: PathBuf::from("/t/app.jar"),
            }),
            vec![app_classes.clone(), core_jar.clone()],
        ));

        let deps = DependencyResults::new(vec![app_classes, app_jar, core_jar]);
        assert_eq!(
            ClasspathTask::entries(&deps),
            vec![
                PathBuf::from("/t/app/classes"),
                PathBuf::from("/t/app.jar"),
                PathBuf::from("/t/core.jar"),
            ]
        );
    }
}
