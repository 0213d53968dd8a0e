//! Object-store access through the external `gsutil` tool.
//!
//! Transfer protocols and authentication stay in the child process; this
//! wrapper only shapes command lines and interprets exit codes.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::types::CacheError;

const TARGET: &str = "gitcache::store";

const GSUTIL_EXE: &str = "gsutil";

/// Thin wrapper over `gsutil`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectStore;

impl ObjectStore {
    /// List object URLs under `prefix`. A failed listing, including a
    /// prefix that matches nothing, is an empty one.
    pub fn list(self, prefix: &str) -> Vec<String> {
        tracing::debug!(target: TARGET, "listing {prefix}");
        let output = Command::new(GSUTIL_EXE)
            .args(["ls", prefix])
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Ok(_) | Err(_) => Vec::new(),
        }
    }

    /// Download `object` into `dest_dir`. False on any failure.
    pub fn download(self, object: &str, dest_dir: &Path) -> bool {
        tracing::info!(target: TARGET, "Downloading {object}");
        run_quietly(Command::new(GSUTIL_EXE).arg("cp").arg(object).arg(dest_dir))
    }

    /// Upload a local file to the `dest` object URL.
    pub fn upload(self, file: &Path, dest: &str) -> Result<(), CacheError> {
        tracing::info!(target: TARGET, "Uploading {} to {dest}", file.display());
        let status = Command::new(GSUTIL_EXE).arg("cp").arg(file).arg(dest).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(CacheError::ObjectStore(status.code().unwrap_or(-1)))
        }
    }

    /// Delete an object. Failures are logged, not fatal; a stale archive
    /// costs storage, not correctness.
    pub fn remove(self, object: &str) {
        tracing::info!(target: TARGET, "Deleting {object}");
        if !run_quietly(Command::new(GSUTIL_EXE).arg("rm").arg(object)) {
            tracing::warn!(target: TARGET, "Failed to delete {object}");
        }
    }
}

fn run_quietly(cmd: &mut Command) -> bool {
    match cmd.status() {
        Ok(status) => status.success(),
        Err(err) => {
            tracing::warn!(target: TARGET, "failed to launch gsutil: {err}");
            false
        }
    }
}
