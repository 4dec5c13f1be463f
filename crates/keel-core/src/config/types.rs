//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::model::{Module, Platform, ProductType, ResolutionScope};

/// Main configuration for a keel project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project name
    pub name: Option<String>,

    /// Engine options
    pub build: BuildConfig,

    /// Task cache configuration
    pub cache: CacheConfig,

    /// Modules of the project
    pub modules: Vec<Module>,

    /// Build actions expanded over the module matrix
    pub actions: Vec<ActionConfig>,
}

/// Engine options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum concurrent tasks (0 = available parallelism)
    pub concurrency: usize,

    /// Build output directory, relative to the project root
    pub output_dir: PathBuf,

    /// Default timeout for action commands, in seconds
    pub task_timeout_secs: Option<u64>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            output_dir: PathBuf::from("build"),
            task_timeout_secs: None,
        }
    }
}

impl BuildConfig {
    /// Concurrency with `0` resolved to the host's available parallelism
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Cache directory
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".keel/cache"),
        }
    }
}

/// Kind of result an action produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Plain set of files
    #[default]
    Files,
    /// Compiled classes directory
    Classes,
    /// Packaged jar
    Jar,
    /// Runtime classpath assembled from upstream jars (built in, no command)
    Classpath,
    /// Installed tool or SDK component
    Tool,
}

/// One build action, registered once per matrix cell it applies to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Action name, used as the task name prefix (e.g. "compile")
    pub name: String,

    /// Shell command to execute
    pub command: Option<String>,

    /// Result kind
    pub output: OutputKind,

    /// Input glob patterns relative to the module directory
    pub inputs: Vec<String>,

    /// Output glob patterns relative to the task output directory
    pub outputs: Vec<String>,

    /// Actions of the same matrix cell that must complete first
    pub depends_on: Vec<String>,

    /// Depend on the same action in module dependencies of this scope
    pub module_dependencies: Option<ResolutionScope>,

    /// Also register the test partition
    pub tests: bool,

    /// Register one task per build type
    pub build_types: bool,

    /// Restrict to these platforms (empty = all module platforms)
    pub platforms: Vec<Platform>,

    /// Restrict to these module types (empty = all)
    pub module_types: Vec<ProductType>,

    /// Environment variables passed to the command
    pub env: BTreeMap<String, String>,

    /// Cache identity shared by every cell running this action. Shared cells
    /// must not depend on their platform, build type or dependency outputs.
    pub shared_key: Option<String>,

    /// Command timeout in seconds, overriding the build default
    pub timeout_secs: Option<u64>,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: None,
            output: OutputKind::Files,
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            module_dependencies: None,
            tests: false,
            build_types: false,
            platforms: Vec::new(),
            module_types: Vec::new(),
            env: BTreeMap::new(),
            shared_key: None,
            timeout_secs: None,
        }
    }
}

impl ActionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_output(mut self, output: OutputKind) -> Self {
        self.output = output;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_depends_on(mut self, action: impl Into<String>) -> Self {
        self.depends_on.push(action.into());
        self
    }

    pub fn with_module_dependencies(mut self, scope: ResolutionScope) -> Self {
        self.module_dependencies = Some(scope);
        self
    }

    pub fn with_tests(mut self, tests: bool) -> Self {
        self.tests = tests;
        self
    }

    pub fn with_build_types(mut self, build_types: bool) -> Self {
        self.build_types = build_types;
        self
    }

    pub fn with_shared_key(mut self, key: impl Into<String>) -> Self {
        self.shared_key = Some(key.into());
        self
    }

    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_module_types(mut self, module_types: Vec<ProductType>) -> Self {
        self.module_types = module_types;
        self
    }
}
