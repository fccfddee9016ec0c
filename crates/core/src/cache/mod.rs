//! Local task cache.
//!
//! The store is a flat directory of zero-length marker files named
//! `<fingerprint>.ok`. Presence of a marker means the last run with that
//! fingerprint succeeded; absence is a miss. Failures are never cached.
//! Concurrent zr processes may race on the directory; that is fine because
//! markers are zero-length and creation truncates.

pub mod remote;

pub use remote::{HttpRemote, RemoteCache, S3Remote};

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "ZR_CACHE_DIR";

const MARKER_SUFFIX: &str = ".ok";

/// On-disk hit/miss store keyed by fingerprint.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

#[derive(Debug, Clone)]
struct CacheDirInputs {
    env_override: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheDirInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) ZR_CACHE_DIR (explicit override)
    // 2) ~/.zr/cache
    // 3) TMPDIR/.zr/cache (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.env_override.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".zr/cache"));
    }
    candidates.push(inputs.temp_dir.join(".zr/cache"));

    for path in candidates {
        if path.exists() {
            // Some CI environments mount read-only home directories; make
            // sure we can actually write before committing to the path.
            let probe = path.join(".write_probe");
            match fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        match fs::create_dir_all(&path) {
            Ok(()) => return Ok(path),
            Err(_) => continue,
        }
    }

    Err(Error::cache("failed to determine a writable cache directory"))
}

impl CacheStore {
    /// Open the default store, resolving the directory from the
    /// environment, the home directory, and the temp directory in order.
    pub fn open_default() -> Result<Self> {
        let root = cache_root_from_inputs(CacheDirInputs {
            env_override: std::env::var(CACHE_DIR_ENV)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            home_dir: dirs::home_dir(),
            temp_dir: std::env::temp_dir(),
        })?;
        Ok(Self { root })
    }

    /// Open a store rooted at an explicit directory, creating it if needed.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io_at("create cache dir", &root, e))?;
        Ok(Self { root })
    }

    /// The directory backing this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn marker_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{MARKER_SUFFIX}"))
    }

    /// Whether a successful run with this fingerprint is recorded. A stat,
    /// no body read.
    #[must_use]
    pub fn has_hit(&self, key: &str) -> bool {
        self.marker_path(key).exists()
    }

    /// Record a successful run. Creation truncates, so concurrent writers
    /// converge on the same zero-length marker.
    pub fn record_hit(&self, key: &str) -> Result<()> {
        let path = self.marker_path(key);
        fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io_at("write cache marker", &path, e))?;
        debug!(key, "recorded cache hit");
        Ok(())
    }

    /// Drop a single entry. Missing entries are not an error.
    pub fn invalidate(&self, key: &str) -> Result<()> {
        let path = self.marker_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_at("remove cache marker", &path, e)),
        }
    }

    /// Remove every marker, returning how many were deleted.
    pub fn clear_all(&self) -> Result<usize> {
        let mut count = 0usize;
        let entries =
            fs::read_dir(&self.root).map_err(|e| Error::io_at("read cache dir", &self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("read cache dir entry", e))?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(MARKER_SUFFIX)
                && fs::remove_file(entry.path()).is_ok()
            {
                count += 1;
            }
        }
        Ok(count)
    }
}
