//! Bootstrap a mirror from the newest cloud archive instead of a cold
//! full fetch.

use std::path::Path;

use super::Mirror;
use super::extract;
use super::staging::StagingDir;
use super::store::ObjectStore;
use crate::tools;

const TARGET: &str = "gitcache::bootstrap";

/// Download and unpack the newest bootstrap archive for `mirror` into
/// `target_dir`.
///
/// Returns false whenever bootstrap is not possible: no bucket for this
/// host, no archives uploaded yet, download or extraction failure. The
/// engine then falls back to an empty init or to the live mirror.
pub fn try_bootstrap(mirror: &Mirror, target_dir: &Path) -> bool {
    let Some(bucket) = mirror.bootstrap_bucket() else {
        return false;
    };

    let store = ObjectStore;
    let prefix = format!("gs://{bucket}/{}", mirror.basename());
    let mut listing = store.list(&prefix);
    listing.sort();
    let Some(newest) = listing.pop() else {
        tracing::debug!(target: TARGET, "no bootstrap archives under {prefix}");
        return false;
    };

    let scratch = match StagingDir::create(mirror.cache_root(), "") {
        Ok(scratch) => scratch,
        Err(err) => {
            tools::warn(format!("Failed to create bootstrap scratch directory: {err}"));
            return false;
        }
    };

    if !store.download(&newest, scratch.path()) {
        return false;
    }
    let filename = newest.rsplit('/').next().unwrap_or(newest.as_str());
    let archive = scratch.path().join(filename);
    let size = std::fs::metadata(&archive).map(|meta| meta.len()).unwrap_or(0);

    let extractor = extract::select(size);
    if let Err(err) = extractor.extract(&archive, target_dir) {
        tools::warn(format!(
            "Extracting bootstrap archive {} failed: {err}\nResuming normal operations.",
            archive.display()
        ));
        return false;
    }
    true
}
