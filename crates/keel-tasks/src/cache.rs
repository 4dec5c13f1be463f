//! Fingerprinting and change cache
//!
//! One JSON record per task identity lives in the cache directory. A record
//! holds the fingerprint of the last successful execution and the output
//! paths it produced. Work is skipped only when the fingerprint matches and
//! every recorded output still exists.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Hash over a unit of work's configuration and input contents
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Compute a fingerprint. Configuration entries are hashed in key order,
    /// inputs in the order given.
    pub fn compute(
        configuration: &BTreeMap<String, String>,
        inputs: &[PathBuf],
    ) -> Result<Self, CacheError> {
        let mut hasher = Sha256::new();

        for (key, value) in configuration {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        for input in inputs {
            hasher.update(b"input:");
            hasher.update(input.to_string_lossy().as_bytes());
            hasher.update(b"\n");
            if input.is_file() {
                hasher.update(b"file:");
                hasher.update(hash_file(input)?);
            } else if input.is_dir() {
                hasher.update(b"dir:");
                hasher.update(hash_directory(input)?);
            } else {
                hasher.update(b"missing");
            }
        }

        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hash_file(path: &Path) -> Result<[u8; 32], CacheError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().into())
}

/// Recursive content hash of a directory, independent of listing order
fn hash_directory(path: &Path) -> Result<[u8; 32], CacheError> {
    let mut entries: BTreeMap<String, Option<[u8; 32]>> = BTreeMap::new();
    for entry in WalkDir::new(path).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let hash = if entry.file_type().is_file() {
            Some(hash_file(entry.path())?)
        } else {
            None
        };
        entries.insert(relative, hash);
    }

    let mut hasher = Sha256::new();
    for (relative, hash) in &entries {
        hasher.update(relative.as_bytes());
        match hash {
            Some(hash) => hasher.update(hash),
            None => hasher.update(b"/"),
        }
    }
    Ok(hasher.finalize().into())
}

/// Persisted outcome of the last successful execution of one identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub identity: String,
    pub fingerprint: Fingerprint,
    pub output_paths: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    fn outputs_exist(&self) -> bool {
        self.output_paths.iter().all(|p| p.exists())
    }
}

/// Outcome of [`TaskCache::execute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output_paths: Vec<PathBuf>,
    /// The stored outputs were reused and the body did not run
    pub up_to_date: bool,
}

/// Change cache backed by one record file per identity
#[derive(Debug)]
pub struct TaskCache {
    cache_dir: PathBuf,
    enabled: bool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskCache {
    /// Create a task cache storing records in `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            enabled: true,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// A cache that never reuses nor stores anything
    pub fn disabled(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: false,
            ..Self::new(cache_dir)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn record_path(&self, identity: &str) -> PathBuf {
        let digest = Sha256::digest(identity.as_bytes());
        self.cache_dir.join(format!("{:x}.json", digest))
    }

    fn key_lock(&self, identity: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run `body` unless a record for `identity` with the same fingerprint
    /// exists and all of its outputs are still on disk.
    ///
    /// Calls with the same identity are serialized: a second caller waits for
    /// the first and then reuses its record.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn execute<F, Fut, E>(
        &self,
        identity: &str,
        configuration: &BTreeMap<String, String>,
        inputs: &[PathBuf],
        body: F,
    ) -> Result<ExecutionResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<PathBuf>, E>>,
        E: From<CacheError>,
    {
        if !self.enabled {
            let output_paths = body().await?;
            return Ok(ExecutionResult {
                output_paths,
                up_to_date: false,
            });
        }

        let lock = self.key_lock(identity);
        let _guard = lock.lock().await;

        let fingerprint = {
            let configuration = configuration.clone();
            let inputs = inputs.to_vec();
            tokio::task::spawn_blocking(move || Fingerprint::compute(&configuration, &inputs))
                .await
                .map_err(|e| CacheError::Io(io::Error::new(io::ErrorKind::Other, e)))??
        };

        if let Some(record) = self.read_record(identity) {
            if record.fingerprint == fingerprint {
                if record.outputs_exist() {
                    debug!("cache hit");
                    return Ok(ExecutionResult {
                        output_paths: record.output_paths,
                        up_to_date: true,
                    });
                }
                debug!("fingerprint matches but outputs are missing");
            } else {
                debug!("fingerprint changed");
            }
        } else {
            debug!("cache miss");
        }

        let output_paths = body().await?;

        let record = ExecutionRecord {
            identity: identity.to_string(),
            fingerprint,
            output_paths: output_paths.clone(),
            created_at: Utc::now(),
        };
        self.write_record(&record)?;

        Ok(ExecutionResult {
            output_paths,
            up_to_date: false,
        })
    }

    /// Read the record for `identity`; missing or unreadable records are absent
    pub fn read_record(&self, identity: &str) -> Option<ExecutionRecord> {
        let path = self.record_path(identity);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache record ignored");
                return None;
            }
        };
        match serde_json::from_str::<ExecutionRecord>(&contents) {
            Ok(record) if record.identity == identity => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache record ignored");
                None
            }
        }
    }

    fn write_record(&self, record: &ExecutionRecord) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir)?;
        let path = self.record_path(&record.identity);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Drop the record for `identity`, forcing the next execution to run
    pub fn invalidate(&self, identity: &str) -> Result<bool, CacheError> {
        match fs::remove_file(self.record_path(identity)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Remove records older than `max_age`; corrupt records are removed too
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        info!(max_age_secs = max_age.as_secs(), "pruning cache");
        let mut stats = PruneStats::default();

        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();

        for path in self.record_files()? {
            stats.total += 1;

            let stale = match fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<ExecutionRecord>(&c).ok())
            {
                Some(record) => record.created_at < cutoff,
                None => true,
            };

            if stale && fs::remove_file(&path).is_ok() {
                stats.removed += 1;
            } else {
                stats.kept += 1;
            }
        }

        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        Ok(stats)
    }

    /// Remove every record
    pub fn clean(&self) -> Result<usize, CacheError> {
        let files = self.record_files()?;
        let count = files.len();
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        info!(removed = count, "cache cleaned");
        Ok(count)
    }

    /// Get cache statistics
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for path in self.record_files()? {
            stats.entries += 1;
            if let Ok(meta) = fs::metadata(&path) {
                stats.total_size += meta.len();
            }
        }
        Ok(stats)
    }
}

/// Statistics from a prune operation
#[derive(Debug, Default)]
pub struct PruneStats {
    /// Total entries found
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache records
    pub entries: usize,
    /// Total size in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        const KB: f64 = 1024.0;
        let size = self.total_size as f64;
        if size < KB {
            format!("{} B", self.total_size)
        } else if size < KB * KB {
            format!("{:.1} KB", size / KB)
        } else if size < KB * KB * KB {
            format!("{:.1} MB", size / (KB * KB))
        } else {
            format!("{:.1} GB", size / (KB * KB * KB))
        }
    }
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Directory traversal error while hashing inputs
    #[error("Cache input walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
