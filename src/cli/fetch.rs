//! The `fetch` verb: refresh the mirrors behind a checkout's remotes,
//! then run the real fetch inside the checkout.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context as _, Result, bail};

use crate::cache::{Mirror, PopulateOptions};
use crate::git::Git;
use crate::tools;

pub(crate) fn run(
    cache_root: PathBuf,
    all: bool,
    bootstrap: bool,
    remotes: Vec<String>,
    verbose: bool,
) -> Result<()> {
    let git = Git::default();
    let cwd = Path::new(".");

    // Mimic plain `git fetch`: an explicit list wins, --all enumerates the
    // checkout's remotes, and the bare form follows the current branch's
    // upstream. No traversal up stacked branches.
    let remotes = if all {
        if !remotes.is_empty() {
            bail!("fatal: fetch --all does not take a repository argument");
        }
        git.output(&["remote"], cwd)
            .wrap_err("not inside a git checkout")?
            .lines()
            .map(str::to_string)
            .filter(|remote| !remote.is_empty())
            .collect()
    } else if !remotes.is_empty() {
        remotes
    } else {
        upstream_remote(git, cwd).into_iter().collect()
    };
    let remotes = if remotes.is_empty() { vec!["origin".to_string()] } else { remotes };

    // A checkout whose git dir already lives under the cache root IS a
    // mirror; repopulate it and stop.
    let git_dir = git.output(&["rev-parse", "--git-dir"], cwd).wrap_err("not inside a git checkout")?;
    let git_dir = tools::canonicalize(&git_dir).unwrap_or_else(|_| PathBuf::from(&git_dir));
    if git_dir.starts_with(&cache_root) {
        let mut mirror = Mirror::from_path(&git_dir, cache_root)?;
        mirror.populate(PopulateOptions { bootstrap, verbose, ..Default::default() })?;
        return Ok(());
    }

    for remote in remotes {
        let remote_url =
            git.output(&["config", &format!("remote.{remote}.url")], cwd).unwrap_or_default();
        if !remote_url.is_empty() && Path::new(&remote_url).starts_with(&cache_root) {
            println!("Updating git cache...");
            let mut mirror = Mirror::from_path(Path::new(&remote_url), cache_root.clone())?;
            mirror.populate(PopulateOptions { bootstrap, verbose, ..Default::default() })?;
        }
        git.passthrough(&["fetch", &remote], cwd)?;
    }
    Ok(())
}

/// The remote behind the current branch's upstream, when there is one.
fn upstream_remote(git: Git, cwd: &Path) -> Option<String> {
    let branch = git.output(&["rev-parse", "--abbrev-ref", "HEAD"], cwd).ok()?;
    if branch == "HEAD" {
        return None;
    }
    let upstream = git.output(&["config", &format!("branch.{branch}.remote")], cwd).ok()?;
    (!upstream.is_empty() && upstream != ".").then_some(upstream)
}
