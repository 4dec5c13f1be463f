//! Matrix selection over (module × platform × test partition × build type)
//!
//! Registration code walks the matrix with a small builder chain:
//!
//! ```ignore
//! project.all_modules()
//!     .filter_module_type(|t| t.is_app())
//!     .also_platforms(&[Platform::Android])
//!     .also_tests()
//!     .also_build_types()
//!     .for_each(|sel| { /* register tasks for `sel` */ });
//! ```

use super::{BuildType, Module, Platform, ProductType, Project, ResolutionScope};

/// One cell of the build matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub module: &'a Module,
    pub platform: Platform,
    pub is_test: bool,
    /// `None` when the selection was not expanded over build types
    pub build_type: Option<BuildType>,
}

impl<'a> Selection<'a> {
    /// Same cell, main (non-test) partition
    pub fn main_partition(&self) -> Self {
        Self {
            is_test: false,
            ..*self
        }
    }

    /// Same cell for another module
    pub fn with_module(&self, module: &'a Module) -> Self {
        Self { module, ..*self }
    }
}

/// First stage of a selection: a filtered list of modules
#[derive(Debug, Clone)]
pub struct ModuleSelector<'a> {
    project: &'a Project,
    modules: Vec<&'a Module>,
}

impl<'a> ModuleSelector<'a> {
    pub(crate) fn new(project: &'a Project, modules: Vec<&'a Module>) -> Self {
        Self { project, modules }
    }

    pub fn filter_module_type(mut self, predicate: impl Fn(ProductType) -> bool) -> Self {
        self.modules.retain(|m| predicate(m.product_type));
        self
    }

    /// Expand each module over its platforms. An empty `only` keeps every
    /// platform the module declares; otherwise only the listed ones the
    /// module actually has.
    pub fn also_platforms(self, only: &[Platform]) -> MatrixSelector<'a> {
        let mut selections = Vec::new();
        for module in self.modules {
            for &platform in &module.platforms {
                if only.is_empty() || only.contains(&platform) {
                    selections.push(Selection {
                        module,
                        platform,
                        is_test: false,
                        build_type: None,
                    });
                }
            }
        }
        MatrixSelector {
            project: self.project,
            selections,
        }
    }
}

/// Second stage of a selection: concrete matrix cells
#[derive(Debug, Clone)]
pub struct MatrixSelector<'a> {
    project: &'a Project,
    selections: Vec<Selection<'a>>,
}

impl<'a> MatrixSelector<'a> {
    pub fn filter_module_type(mut self, predicate: impl Fn(ProductType) -> bool) -> Self {
        self.selections.retain(|s| predicate(s.module.product_type));
        self
    }

    /// Add the test partition next to every main cell
    pub fn also_tests(self) -> Self {
        let selections = self
            .selections
            .into_iter()
            .flat_map(|s| [s, Selection { is_test: true, ..s }])
            .collect();
        Self {
            project: self.project,
            selections,
        }
    }

    /// Expand every cell over all build types
    pub fn also_build_types(self) -> Self {
        let selections = self
            .selections
            .into_iter()
            .flat_map(|s| {
                BuildType::ALL.map(|bt| Selection {
                    build_type: Some(bt),
                    ..s
                })
            })
            .collect();
        Self {
            project: self.project,
            selections,
        }
    }

    /// Pair every cell with each module it depends on in `scope`. Dependency
    /// modules that do not build for the cell's platform are left out.
    pub fn select_module_dependencies(&self, scope: ResolutionScope) -> Vec<(Selection<'a>, &'a Module)> {
        let mut pairs = Vec::new();
        for selection in &self.selections {
            for dep in &selection.module.dependencies {
                if !dep.scope.includes(scope) {
                    continue;
                }
                if let Some(dep_module) = self.project.module(&dep.module) {
                    if dep_module.has_platform(selection.platform) {
                        pairs.push((*selection, dep_module));
                    }
                }
            }
        }
        pairs
    }

    pub fn for_each(self, f: impl FnMut(Selection<'a>)) {
        self.selections.into_iter().for_each(f)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selection<'a>> {
        self.selections.iter()
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

impl<'a> IntoIterator for MatrixSelector<'a> {
    type Item = Selection<'a>;
    type IntoIter = std::vec::IntoIter<Selection<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.selections.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DependencyScope;

    fn project() -> Project {
        Project::new(
            "/p",
            vec![
                Module::new("core", ProductType::Lib).with_platforms([Platform::Jvm, Platform::Android]),
                Module::new("app", ProductType::AndroidApp)
                    .with_platforms([Platform::Android])
                    .with_dependency("core", DependencyScope::All),
                Module::new("tool", ProductType::JvmApp)
                    .with_platforms([Platform::Jvm])
                    .with_dependency("core", DependencyScope::Runtime),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_full_matrix_size() {
        let project = project();
        let matrix = project.all_modules().also_platforms(&[]).also_tests().also_build_types();
        // core: 2 platforms, app: 1, tool: 1 => 4 cells × 2 partitions × 2 build types
        assert_eq!(matrix.len(), 16);
    }

    #[test]
    fn test_platform_restriction() {
        let project = project();
        let matrix = project.all_modules().also_platforms(&[Platform::Android]);
        let names: Vec<_> = matrix.iter().map(|s| s.module.name.as_str()).collect();
        assert_eq!(names, vec!["core", "app"]);
    }

    #[test]
    fn test_filter_module_type() {
        let project = project();
        let matrix = project
            .all_modules()
            .filter_module_type(|t| t.is_app())
            .also_platforms(&[]);
        assert!(matrix.iter().all(|s| s.module.product_type.is_app()));
        assert_eq!(matrix.len(), 2);
    }

    #[test]
    fn test_also_tests_keeps_main_first() {
        let project = project();
        let matrix = project.all_modules().also_platforms(&[Platform::Jvm]).also_tests();
        let flags: Vec<_> = matrix.iter().map(|s| (s.module.name.as_str(), s.is_test)).collect();
        assert_eq!(
            flags,
            vec![("core", false), ("core", true), ("tool", false), ("tool", true)]
        );
    }

    #[test]
    fn test_select_module_dependencies_respects_scope() {
        let project = project();
        let matrix = project.all_modules().also_platforms(&[]);

        let compile = matrix.select_module_dependencies(ResolutionScope::Compile);
        let compile: Vec<_> = compile
            .iter()
            .map(|(s, dep)| (s.module.name.as_str(), dep.name.as_str()))
            .collect();
        assert_eq!(compile, vec![("app", "core")]);

        let runtime = matrix.select_module_dependencies(ResolutionScope::Runtime);
        assert_eq!(runtime.len(), 2);
    }

    #[test]
    fn test_main_partition() {
        let project = project();
        let core = project.module("core").unwrap();
        let sel = Selection {
            module: core,
            platform: Platform::Jvm,
            is_test: true,
            build_type: Some(BuildType::Release),
        };
        let main = sel.main_partition();
        assert!(!main.is_test);
        assert_eq!(main.build_type, Some(BuildType::Release));
    }
}
