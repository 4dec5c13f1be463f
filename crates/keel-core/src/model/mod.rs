//! Project model: modules, platforms, build types and dependency scopes
//!
//! The model is the input to task registration. It is deliberately small and
//! immutable once constructed; everything that varies per build lives in
//! [`crate::context::BuildContext`].

pub mod selection;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

pub use selection::{MatrixSelector, ModuleSelector, Selection};

/// Leaf compilation targets a module can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Platform {
    Jvm,
    Android,
    IosArm64,
    IosSimulatorArm64,
    IosX64,
    MacosArm64,
    MacosX64,
    LinuxX64,
    MingwX64,
    Js,
}

impl Platform {
    /// Every known platform, in declaration order
    pub const ALL: [Platform; 10] = [
        Self::Jvm,
        Self::Android,
        Self::IosArm64,
        Self::IosSimulatorArm64,
        Self::IosX64,
        Self::MacosArm64,
        Self::MacosX64,
        Self::LinuxX64,
        Self::MingwX64,
        Self::Js,
    ];

    /// Identifier used in configuration files (e.g. "iosArm64")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jvm => "jvm",
            Self::Android => "android",
            Self::IosArm64 => "iosArm64",
            Self::IosSimulatorArm64 => "iosSimulatorArm64",
            Self::IosX64 => "iosX64",
            Self::MacosArm64 => "macosArm64",
            Self::MacosX64 => "macosX64",
            Self::LinuxX64 => "linuxX64",
            Self::MingwX64 => "mingwX64",
            Self::Js => "js",
        }
    }

    /// Capitalised form used inside task names (e.g. "IosArm64")
    pub fn pretty(&self) -> &'static str {
        match self {
            Self::Jvm => "Jvm",
            Self::Android => "Android",
            Self::IosArm64 => "IosArm64",
            Self::IosSimulatorArm64 => "IosSimulatorArm64",
            Self::IosX64 => "IosX64",
            Self::MacosArm64 => "MacosArm64",
            Self::MacosX64 => "MacosX64",
            Self::LinuxX64 => "LinuxX64",
            Self::MingwX64 => "MingwX64",
            Self::Js => "Js",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ModelError> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ModelError::UnknownPlatform(s.to_string()))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Debug,
    Release,
}

impl BuildType {
    pub const ALL: [BuildType; 2] = [Self::Debug, Self::Release];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    /// Suffix appended to task names
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Release => "Release",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a module produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProductType {
    #[default]
    Lib,
    JvmApp,
    AndroidApp,
    IosApp,
    MacosApp,
    LinuxApp,
}

impl ProductType {
    pub fn is_app(&self) -> bool {
        !matches!(self, Self::Lib)
    }
}

/// Which resolution a dependency edge is visible in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionScope {
    Compile,
    Runtime,
}

/// Declared scope of a module dependency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyScope {
    #[default]
    All,
    Compile,
    Runtime,
}

impl DependencyScope {
    pub fn includes(&self, scope: ResolutionScope) -> bool {
        match self {
            Self::All => true,
            Self::Compile => scope == ResolutionScope::Compile,
            Self::Runtime => scope == ResolutionScope::Runtime,
        }
    }
}

/// Dependency of one module on another module of the same project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDependency {
    /// Name of the module depended upon
    pub module: String,
    /// Where the dependency is visible
    #[serde(default)]
    pub scope: DependencyScope,
}

impl ModuleDependency {
    pub fn new(module: impl Into<String>, scope: DependencyScope) -> Self {
        Self {
            module: module.into(),
            scope,
        }
    }
}

/// A buildable unit of the project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Module name, unique within the project
    pub name: String,

    /// Directory relative to the project root (defaults to the name)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Product type
    #[serde(default, rename = "type")]
    pub product_type: ProductType,

    /// Platforms this module is compiled for
    #[serde(default)]
    pub platforms: Vec<Platform>,

    /// Dependencies on other modules
    #[serde(default)]
    pub dependencies: Vec<ModuleDependency>,
}

impl Module {
    pub fn new(name: impl Into<String>, product_type: ProductType) -> Self {
        Self {
            name: name.into(),
            path: None,
            product_type,
            platforms: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_platforms(mut self, platforms: impl IntoIterator<Item = Platform>) -> Self {
        self.platforms = platforms.into_iter().collect();
        self
    }

    pub fn with_dependency(mut self, module: impl Into<String>, scope: DependencyScope) -> Self {
        self.dependencies.push(ModuleDependency::new(module, scope));
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Absolute module directory for a given project root
    pub fn dir(&self, project_root: &Path) -> PathBuf {
        match &self.path {
            Some(path) => project_root.join(path),
            None => project_root.join(&self.name),
        }
    }

    pub fn has_platform(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }
}

/// The set of modules making up one project
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    modules: Vec<Module>,
}

impl Project {
    /// Create a project, checking module names are unique and every
    /// dependency resolves.
    pub fn new(root: impl Into<PathBuf>, modules: Vec<Module>) -> Result<Self, ModelError> {
        Self::check_modules(&modules)?;
        Ok(Self {
            root: root.into(),
            modules,
        })
    }

    /// Structural checks shared with configuration validation
    pub fn check_modules(modules: &[Module]) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for module in modules {
            if !seen.insert(module.name.as_str()) {
                return Err(ModelError::DuplicateModule(module.name.clone()));
            }
        }
        for module in modules {
            for dep in &module.dependencies {
                if !seen.contains(dep.module.as_str()) {
                    return Err(ModelError::UnknownModuleDependency {
                        module: module.name.clone(),
                        dependency: dep.module.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Start a matrix selection over every module
    pub fn all_modules(&self) -> ModuleSelector<'_> {
        ModuleSelector::new(self, self.modules.iter().collect())
    }
}
