//! Scratch directories under the cache root, plus the retried filesystem
//! primitives that move them around.
//!
//! A mirror is never rebuilt at its final path: everything is assembled in
//! a scratch sibling and renamed in at the end. The guard here makes sure
//! the scratch space disappears on every exit path, including panics.

use std::fs;
use std::path::{Path, PathBuf};

use crate::retry;
use crate::types::CacheError;

const TARGET: &str = "gitcache::staging";

/// Prefix shared by every scratch directory under the cache root.
pub const SCRATCH_PREFIX: &str = "_cache_tmp";

/// A temporary directory under the cache root, removed (with retry) on
/// drop unless handed off with [`StagingDir::into_path`].
#[derive(Debug)]
pub struct StagingDir {
    path: Option<PathBuf>,
}

impl StagingDir {
    /// Create a scratch directory directly under `cache_root`. Mirror
    /// staging passes the mirror basename as `suffix` so concurrent
    /// populations of different mirrors never collide.
    pub fn create(cache_root: &Path, suffix: &str) -> Result<Self, CacheError> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(suffix)
            .tempdir_in(cache_root)?;
        Ok(StagingDir { path: Some(dir.keep()) })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().expect("staging directory still owned")
    }

    /// Hand the directory off to its final owner; drop no longer removes
    /// it.
    pub fn into_path(mut self) -> PathBuf {
        self.path.take().expect("staging directory still owned")
    }

    /// Remove the directory now, consuming the guard.
    pub fn remove(mut self) -> Result<(), CacheError> {
        match self.path.take() {
            Some(path) => remove_tree(&path),
            None => Ok(()),
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = remove_tree(&path) {
                tracing::warn!(
                    target: TARGET,
                    "Failed to remove staging directory {}: {}",
                    path.display(),
                    err
                );
            }
        }
    }
}

/// Recursively delete `path` under the retry policy. Missing paths are
/// fine.
pub fn remove_tree(path: &Path) -> Result<(), CacheError> {
    if !path.exists() {
        return Ok(());
    }
    retry::with_backoff(
        &format!("rmtree [{}]", path.display()),
        || rda::remove_dir_all(path).map_err(CacheError::Io),
        CacheError::is_transient_fs,
    )
}

/// Rename `src` to `dst` under the retry policy.
pub fn rename(src: &Path, dst: &Path) -> Result<(), CacheError> {
    retry::with_backoff(
        &format!("rename [{}] => [{}]", src.display(), dst.display()),
        || fs::rename(src, dst).map_err(CacheError::Io),
        CacheError::is_transient_fs,
    )
}
