//! Keel Core - project model and configuration for the keel build tool
//!
//! This crate provides the foundational types, error handling, configuration
//! loading and the per-build context used by the task engine.

pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod system;

pub use config::{ActionConfig, Config, OutputKind};
pub use context::BuildContext;
pub use error::{ConfigError, KeelError, ModelError, Result};
pub use model::{
    BuildType, DependencyScope, Module, ModuleDependency, Platform, ProductType, Project,
    ResolutionScope, Selection,
};
pub use system::{Arch, HostInfo, OsFamily};
