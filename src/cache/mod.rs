//! The mirror engine.
//!
//! A [`Mirror`] value is ephemeral; the on-disk mirror directory it points
//! at is long-lived. The directory is created on first populate, mutated
//! only through the staging-then-rename protocol, and deleted only during
//! corruption recovery or a successful re-bootstrap, so no caller ever
//! observes a half-built mirror at the final path.

pub mod bootstrap;
pub mod codec;
pub mod extract;
pub mod staging;
pub mod store;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::eyre;
use url::Url;

use crate::git::Git;
use crate::types::{CacheError, FetchSpec};
use staging::StagingDir;
use store::ObjectStore;

const TARGET: &str = "gitcache::engine";

/// Mirrors git's gc.autopacklimit: more packfiles than this and the
/// repository is degenerate enough to rebuild from an archive.
const GC_AUTOPACKLIMIT: usize = 50;

/// Fixed marker printed before a clobber so operators can grep for it.
pub const CACHE_CORRUPT_MESSAGE: &str = "WARNING: The git cache is corrupt.";

/// The fetch spec every mirror carries, whatever the user adds.
const DEFAULT_FETCH_SPEC: &str = "+refs/heads/*:refs/heads/*";
const DEFAULT_FETCH_SPEC_REGEX: &str = r"\+refs/heads/\*:.*";

/// Options for [`Mirror::populate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulateOptions {
    /// Limit history to this many commits per fetched ref
    pub depth: Option<u32>,
    /// Shorthand for a 10000-commit depth
    pub shallow: bool,
    /// Allow bootstrapping from the object store
    pub bootstrap: bool,
    /// Pass `-v --progress` to git fetch
    pub verbose: bool,
}

/// A bare, object-only local clone of a remote repository, shared by every
/// checkout on the host.
#[derive(Debug, Clone)]
pub struct Mirror {
    url: String,
    fetch_specs: BTreeSet<FetchSpec>,
    cache_root: PathBuf,
    basename: String,
    mirror_path: PathBuf,
    git: Git,
}

impl Mirror {
    pub fn new(url: &str, refs: &[String], cache_root: PathBuf) -> Result<Self, CacheError> {
        let basename = codec::url_to_basename(url)?;
        let mirror_path = cache_root.join(&basename);
        Ok(Mirror {
            url: url.to_string(),
            fetch_specs: refs.iter().map(|spec| FetchSpec::parse(spec)).collect(),
            cache_root,
            basename,
            mirror_path,
            git: Git::default(),
        })
    }

    /// Rebuild a Mirror from its on-disk cache directory.
    pub fn from_path(path: &Path, cache_root: PathBuf) -> Result<Self, CacheError> {
        let basename = path
            .file_name()
            .ok_or_else(|| eyre!("cache path {} has no basename", path.display()))?
            .to_string_lossy();
        Self::new(&codec::basename_to_url(&basename), &[], cache_root)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// The mirror's final on-disk location.
    pub fn path(&self) -> &Path {
        &self.mirror_path
    }

    /// True iff the mirror directory holds a bare-repository config file.
    pub fn exists(&self) -> bool {
        self.mirror_path.join("config").is_file()
    }

    /// The object-store bucket holding bootstrap archives for this host,
    /// if any.
    pub fn bootstrap_bucket(&self) -> Option<&'static str> {
        match Url::parse(&self.url).ok()?.host_str()? {
            "chromium.googlesource.com" => Some("chromium-git-cache"),
            "chrome-internal.googlesource.com" => Some("chrome-git-cache"),
            _ => None,
        }
    }

    /// Whether this repo is known to have bootstrap archives available.
    pub fn supported_project(&self) -> bool {
        self.bootstrap_bucket().is_some()
    }

    /// Ensure the cache holds up-to-date objects for this repository.
    ///
    /// Decides between bootstrap, empty init, and incremental fetch;
    /// recovers once from structural corruption; and swaps any staged
    /// result in atomically at the end. On error before the final rename
    /// the live mirror is untouched.
    pub fn populate(&mut self, options: PopulateOptions) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_root)?;
        let mut depth = options.depth;
        if options.shallow && depth.is_none() {
            depth = Some(10_000);
        }

        let mut staging = self.ensure_bootstrapped(depth, options.bootstrap, false)?;
        let rundir =
            staging.as_ref().map_or_else(|| self.mirror_path.clone(), |s| s.path().to_path_buf());

        match self.configure_and_fetch(&rundir, options.verbose, depth) {
            Ok(()) => {}
            Err(CacheError::ClobberNeeded) => {
                // Structural corruption: drop the working directory and
                // force a rebuild. A second failure propagates.
                match staging.take() {
                    Some(scratch) => scratch.remove()?,
                    None => staging::remove_tree(&self.mirror_path)?,
                }
                println!("{CACHE_CORRUPT_MESSAGE}");
                staging = self.ensure_bootstrapped(depth, options.bootstrap, true)?;
                let rundir = staging
                    .as_ref()
                    .map_or_else(|| self.mirror_path.clone(), |s| s.path().to_path_buf());
                self.configure_and_fetch(&rundir, options.verbose, depth)?;
            }
            Err(err) => return Err(err),
        }

        if let Some(staging) = staging {
            // Deleting the old directory immediately before the rename
            // narrows the window in which neither is at the final path.
            if self.mirror_path.exists() {
                staging::remove_tree(&self.mirror_path)?;
            }
            staging::rename(&staging.into_path(), &self.mirror_path)?;
        }
        Ok(())
    }

    /// The bootstrap decision. Returns the staging directory a rebuild
    /// should run in, or `None` to fetch into the live mirror.
    fn ensure_bootstrapped(
        &mut self,
        depth: Option<u32>,
        bootstrap: bool,
        force: bool,
    ) -> Result<Option<StagingDir>, CacheError> {
        let pack_count = self.count_pack_files();
        let should_bootstrap = force || !self.exists() || pack_count > GC_AUTOPACKLIMIT;
        if !should_bootstrap {
            if depth.is_some() && self.mirror_path.join("shallow").exists() {
                tracing::warn!(
                    target: TARGET,
                    "Shallow fetch requested, but repo cache already exists."
                );
            }
            return Ok(None);
        }

        if self.exists() {
            // Re-bootstrapping an existing mirror; keep the refs its
            // owner configured earlier.
            self.preserve_fetchspec();
        }

        let staging = StagingDir::create(&self.cache_root, &self.basename)?;
        let bootstrapped =
            depth.is_none() && bootstrap && bootstrap::try_bootstrap(self, staging.path());
        if bootstrapped {
            // The old mirror stays in place until the staged result is
            // renamed in, so a failure between here and the swap leaves
            // it untouched.
            Ok(Some(staging))
        } else if !self.exists() || !self.supported_project() {
            self.git.run(&["init", "--bare"], staging.path())?;
            Ok(Some(staging))
        } else {
            tracing::warn!(
                target: TARGET,
                "Git cache has a lot of pack files ({pack_count}). Tried to re-bootstrap but \
                 failed. Continuing with non-optimized repository."
            );
            staging.remove()?;
            Ok(None)
        }
    }

    fn count_pack_files(&self) -> usize {
        let pack_dir = self.mirror_path.join("objects").join("pack");
        match fs::read_dir(&pack_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "pack"))
                .count(),
            Err(_) => 0,
        }
    }

    /// Union the existing mirror's `remote.origin.fetch` entries into our
    /// spec set so earlier additions survive a rebuild.
    fn preserve_fetchspec(&mut self) {
        match self.git.output(&["config", "--get-all", "remote.origin.fetch"], &self.mirror_path) {
            Ok(configured) => self.absorb_configured_specs(&configured),
            Err(err) => {
                tracing::warn!(
                    target: TARGET,
                    "Tried and failed to preserve remote.origin.fetch from the existing cache \
                     directory ({err}). You may need to manually edit {} and fetch again.",
                    self.mirror_path.join("config").display()
                );
            }
        }
    }

    /// Union previously configured fetch lines into the spec set.
    fn absorb_configured_specs(&mut self, configured: &str) {
        for line in configured.lines().map(str::trim).filter(|line| !line.is_empty()) {
            self.fetch_specs.insert(FetchSpec::parse(line));
        }
    }

    fn configure(&self, rundir: &Path) -> Result<(), CacheError> {
        // A background gc killed mid-run can leave the repository corrupt.
        // Failure to set this is also the earliest signal that the
        // repository itself is unusable.
        if self.git.run(&["config", "gc.autodetach", "0"], rundir).is_err() {
            return Err(CacheError::ClobberNeeded);
        }

        if self.supported_project() {
            // Combining packs into one is prohibitively slow on these
            // repositories and reports no progress.
            self.git.run(&["config", "gc.autopacklimit", "0"], rundir)?;
        }

        self.git.run(&["config", "core.deltaBaseCacheLimit", delta_base_cache_limit()], rundir)?;
        self.git.run(&["config", "remote.origin.url", &self.url], rundir)?;
        self.git.run(
            &[
                "config",
                "--replace-all",
                "remote.origin.fetch",
                DEFAULT_FETCH_SPEC,
                DEFAULT_FETCH_SPEC_REGEX,
            ],
            rundir,
        )?;
        for spec in &self.fetch_specs {
            self.git.run(
                &["config", "--replace-all", "remote.origin.fetch", &spec.line, &spec.value_regex],
                rundir,
            )?;
        }
        Ok(())
    }

    /// Configure `rundir`, then fetch every configured spec from origin.
    ///
    /// A failed fetch of the built-in branch glob means the repository is
    /// corrupt; failures of user specs are only warned about.
    fn configure_and_fetch(
        &self,
        rundir: &Path,
        verbose: bool,
        depth: Option<u32>,
    ) -> Result<(), CacheError> {
        self.configure(rundir)?;

        let mut fetch_args: Vec<String> = vec!["fetch".into()];
        if verbose {
            fetch_args.extend(["-v".into(), "--progress".into()]);
        }
        if let Some(depth) = depth {
            fetch_args.extend(["--depth".into(), depth.to_string()]);
        }
        fetch_args.push("origin".into());

        let configured =
            self.git.output(&["config", "--get-all", "remote.origin.fetch"], rundir)?;
        for spec in configured.lines().map(str::trim).filter(|spec| !spec.is_empty()) {
            tracing::info!(target: TARGET, "Fetching {spec}");
            let mut args: Vec<&str> = fetch_args.iter().map(String::as_str).collect();
            args.push(spec);
            match self.git.run_retried(&args, rundir) {
                Ok(()) => {}
                Err(CacheError::Vcs(_)) if spec == DEFAULT_FETCH_SPEC => {
                    return Err(CacheError::ClobberNeeded);
                }
                Err(CacheError::Vcs(_)) => {
                    tracing::warn!(target: TARGET, "Fetch of {spec} failed");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Compact the mirror and publish it as the newest bootstrap archive.
    ///
    /// Archives are named `<generation>.zip` where the generation is the
    /// commit count of the default branch, zero-padded so lexicographic
    /// order equals numeric order. With `prune`, every older archive is
    /// deleted after the upload.
    pub fn update_bootstrap(&self, prune: bool) -> Result<(), CacheError> {
        let bucket =
            self.bootstrap_bucket().ok_or_else(|| CacheError::Unsupported(self.url.clone()))?;

        let commit_count = self.git.output(&["rev-list", "--count", "HEAD"], &self.mirror_path)?;
        let generation = format!("{commit_count:0>10}");

        // Compact to (nearly) one packfile before archiving.
        self.git.run(&["gc", "--prune=all"], &self.mirror_path)?;

        // Reserve a name, then let the external zip tool create the file.
        let (file, zip_path) = tempfile::Builder::new()
            .suffix(".zip")
            .tempfile()?
            .keep()
            .map_err(|err| CacheError::Io(err.error))?;
        drop(file);
        fs::remove_file(&zip_path)?;

        let result = self.publish_archive(&zip_path, bucket, &generation, prune);
        let _ = fs::remove_file(&zip_path);
        result
    }

    fn publish_archive(
        &self,
        zip_path: &Path,
        bucket: &str,
        generation: &str,
        prune: bool,
    ) -> Result<(), CacheError> {
        let status = std::process::Command::new("zip")
            .arg("-r")
            .arg(zip_path)
            .arg(".")
            .current_dir(&self.mirror_path)
            .status()?;
        if !status.success() {
            return Err(CacheError::General(eyre!("zip exited with {status}")));
        }

        let store = ObjectStore;
        let folder = format!("gs://{bucket}/{}", self.basename);
        let dest = format!("{folder}/{generation}.zip");
        store.upload(zip_path, &dest)?;

        if prune {
            for object in store.list(&folder) {
                if object != dest {
                    store.remove(&object);
                }
            }
        }
        Ok(())
    }

    /// Delete residues of interrupted pack creation under
    /// `<path>/objects/pack/`; stale temporaries confuse later index
    /// regeneration.
    pub fn clean_temp_packs(path: &Path) {
        let pack_dir = path.join("objects").join("pack");
        let Ok(entries) = fs::read_dir(&pack_dir) else {
            return;
        };
        for entry in entries.filter_map(|entry| entry.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(".tmp-") || name.starts_with("tmp_pack_") {
                let file = entry.path();
                match fs::remove_file(&file) {
                    Ok(()) => tracing::warn!(
                        target: TARGET,
                        "Deleted stale temporary pack file {}",
                        file.display()
                    ),
                    Err(err) => tracing::warn!(
                        target: TARGET,
                        "Unable to delete temporary pack file {}: {err}",
                        file.display()
                    ),
                }
            }
        }
    }
}

/// More RAM for delta-chain caching speeds up "Resolving deltas".
fn delta_base_cache_limit() -> &'static str {
    if cfg!(target_pointer_width = "64") { "2g" } else { "512m" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror_for(url: &str, root: &Path) -> Mirror {
        Mirror::new(url, &[], root.to_path_buf()).unwrap()
    }

    #[test]
    fn mirror_paths_derive_from_the_url() {
        let root = tempfile::tempdir().unwrap();
        let mirror = mirror_for("https://chromium.googlesource.com/chromium/src.git", root.path());
        assert_eq!(mirror.basename(), "chromium.googlesource.com-chromium-src");
        assert_eq!(mirror.path(), root.path().join("chromium.googlesource.com-chromium-src"));
    }

    #[test]
    fn exists_requires_a_config_file() {
        let root = tempfile::tempdir().unwrap();
        let mirror = mirror_for("https://example.com/repo", root.path());
        assert!(!mirror.exists());

        fs::create_dir_all(mirror.path()).unwrap();
        assert!(!mirror.exists());

        fs::write(mirror.path().join("config"), b"[core]\n\tbare = true\n").unwrap();
        assert!(mirror.exists());
    }

    #[test]
    fn from_path_recovers_the_url() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("chromium.googlesource.com-chromium-src");
        let mirror = Mirror::from_path(&path, root.path().to_path_buf()).unwrap();
        assert_eq!(mirror.url(), "https://chromium.googlesource.com/chromium/src");
        assert_eq!(mirror.path(), path);
    }

    #[test]
    fn bootstrap_buckets_cover_known_hosts_only() {
        let root = tempfile::tempdir().unwrap();
        let chromium = mirror_for("https://chromium.googlesource.com/chromium/src", root.path());
        assert_eq!(chromium.bootstrap_bucket(), Some("chromium-git-cache"));
        assert!(chromium.supported_project());

        let internal = mirror_for("https://chrome-internal.googlesource.com/a/b", root.path());
        assert_eq!(internal.bootstrap_bucket(), Some("chrome-git-cache"));

        let github = mirror_for("https://github.com/rust-lang/rust", root.path());
        assert_eq!(github.bootstrap_bucket(), None);
        assert!(!github.supported_project());
    }

    #[test]
    fn user_refs_are_canonicalized_on_construction() {
        let root = tempfile::tempdir().unwrap();
        let mirror = Mirror::new(
            "https://example.com/repo",
            &["main".to_string(), "+refs/tags/v*:refs/tags/v*".to_string()],
            root.path().to_path_buf(),
        )
        .unwrap();
        let lines: Vec<&str> = mirror.fetch_specs.iter().map(|spec| spec.line.as_str()).collect();
        assert_eq!(lines, ["+refs/heads/main:refs/heads/main", "+refs/tags/v*:refs/tags/v*"]);
    }

    #[test]
    fn pack_files_are_counted_by_extension() {
        let root = tempfile::tempdir().unwrap();
        let mirror = mirror_for("https://example.com/repo", root.path());
        let pack_dir = mirror.path().join("objects").join("pack");
        fs::create_dir_all(&pack_dir).unwrap();
        for name in ["pack-1.pack", "pack-2.pack", "pack-1.idx", "keep"] {
            fs::write(pack_dir.join(name), b"").unwrap();
        }
        assert_eq!(mirror.count_pack_files(), 2);
    }

    #[test]
    fn clean_temp_packs_removes_only_temporaries() {
        let root = tempfile::tempdir().unwrap();
        let pack_dir = root.path().join("objects").join("pack");
        fs::create_dir_all(&pack_dir).unwrap();
        for name in [".tmp-1234", "tmp_pack_abcd", "pack-feed.pack", "pack-feed.idx"] {
            fs::write(pack_dir.join(name), b"").unwrap();
        }

        Mirror::clean_temp_packs(root.path());

        let mut left: Vec<String> = fs::read_dir(&pack_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, ["pack-feed.idx", "pack-feed.pack"]);
    }

    #[test]
    fn clean_temp_packs_tolerates_missing_pack_dir() {
        let root = tempfile::tempdir().unwrap();
        Mirror::clean_temp_packs(root.path());
    }

    #[test]
    fn failed_populate_leaves_existing_mirror_untouched() {
        let root = tempfile::tempdir().unwrap();
        let mut mirror = mirror_for("https://example.com/repo", root.path());
        // A vcs binary that cannot be spawned fails the rebuild after the
        // staging directory exists but before anything is swapped in.
        mirror.git = Git::with_exe("gitcache-no-such-vcs");

        fs::create_dir_all(mirror.path().join("objects").join("pack")).unwrap();
        fs::write(mirror.path().join("config"), b"[core]\n\tbare = true\n").unwrap();
        let pack_dir = mirror.path().join("objects").join("pack");
        for i in 0..60 {
            fs::write(pack_dir.join(format!("pack-{i}.pack")), b"PACK").unwrap();
        }

        let err = mirror.populate(PopulateOptions::default()).unwrap_err();
        assert!(matches!(err, CacheError::Io(_)), "{err}");

        assert!(mirror.exists());
        assert_eq!(mirror.count_pack_files(), 60);
        let leftovers: Vec<String> = fs::read_dir(root.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(staging::SCRATCH_PREFIX))
            .collect();
        assert!(leftovers.is_empty(), "staging residue: {leftovers:?}");
    }

    #[test]
    fn configured_specs_survive_into_the_rebuild_set() {
        let root = tempfile::tempdir().unwrap();
        let mut mirror = Mirror::new(
            "https://example.com/repo",
            &["main".to_string()],
            root.path().to_path_buf(),
        )
        .unwrap();

        mirror.absorb_configured_specs("+refs/heads/*:refs/heads/*\n+refs/tags/v*:refs/tags/v*\n");

        let lines: Vec<&str> = mirror.fetch_specs.iter().map(|spec| spec.line.as_str()).collect();
        assert!(lines.contains(&"+refs/heads/main:refs/heads/main"), "{lines:?}");
        assert!(lines.contains(&"+refs/heads/*:refs/heads/*"), "{lines:?}");
        assert!(lines.contains(&"+refs/tags/v*:refs/tags/v*"), "{lines:?}");
    }

    #[test]
    #[cfg(unix)]
    fn broken_mirror_converges_to_the_absent_mirror_state() {
        // `true` stands in for git: every invocation succeeds and writes
        // nothing, so both populations drive the identical
        // staging-then-swap path without a real repository.
        let root = tempfile::tempdir().unwrap();

        let mut broken = mirror_for("https://example.com/broken", root.path());
        broken.git = Git::with_exe("true");
        let pack_dir = broken.path().join("objects").join("pack");
        fs::create_dir_all(&pack_dir).unwrap();
        fs::write(pack_dir.join("pack-junk.pack"), b"not a pack").unwrap();
        broken.populate(PopulateOptions::default()).unwrap();

        let mut absent = mirror_for("https://example.com/absent", root.path());
        absent.git = Git::with_exe("true");
        absent.populate(PopulateOptions::default()).unwrap();

        let listing = |mirror: &Mirror| -> Vec<String> {
            fs::read_dir(mirror.path())
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
                .collect()
        };
        assert_eq!(listing(&broken), listing(&absent));
        assert!(!broken.path().join("objects").exists());
    }
}
