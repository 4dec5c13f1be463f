//! Explicit build context
//!
//! Everything a build needs to know about where it runs (roots, host) lives
//! here and is handed to the graph builder, the cache and the executor. There
//! is no process-wide state.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Config;
use crate::system::HostInfo;

/// Paths and host information for one build invocation
#[derive(Debug, Clone)]
pub struct BuildContext {
    project_root: PathBuf,
    build_root: PathBuf,
    cache_root: PathBuf,
    host: HostInfo,
}

impl BuildContext {
    /// Create a context rooted at `project_root`, with the build output in
    /// `<root>/build` and the task cache in `<root>/.keel/cache`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            build_root: project_root.join("build"),
            cache_root: project_root.join(".keel").join("cache"),
            project_root,
            host: HostInfo::detect(),
        }
    }

    /// Create a context using the output and cache directories from config
    pub fn from_config(project_root: impl Into<PathBuf>, config: &Config) -> Self {
        let project_root = project_root.into();
        Self {
            build_root: resolve(&project_root, &config.build.output_dir),
            cache_root: resolve(&project_root, &config.cache.dir),
            project_root,
            host: HostInfo::detect(),
        }
    }

    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    /// Create every root directory. Safe to call more than once.
    pub fn init(&self) -> std::io::Result<()> {
        for dir in [
            self.build_root.clone(),
            self.tasks_root(),
            self.logs_root(),
            self.temp_root(),
            self.cache_root.clone(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        debug!(build_root = %self.build_root.display(), "build context initialised");
        Ok(())
    }

    /// Remove per-build scratch space
    pub fn teardown(&self) {
        let temp = self.temp_root();
        match std::fs::remove_dir_all(&temp) {
            Ok(()) => debug!(path = %temp.display(), "temp root removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %temp.display(), error = %e, "failed to remove temp root"),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// Parent of every task-private output directory
    pub fn tasks_root(&self) -> PathBuf {
        self.build_root.join("tasks")
    }

    pub fn logs_root(&self) -> PathBuf {
        self.build_root.join("logs")
    }

    pub fn temp_root(&self) -> PathBuf {
        self.build_root.join("temp")
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn host(&self) -> HostInfo {
        self.host
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
