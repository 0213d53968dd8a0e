use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::eyre::Result;

use crate::cache::{Mirror, PopulateOptions};
use crate::git::Git;
use crate::tools;
use crate::types::CacheError;

mod fetch;

pub fn cache_main() -> Result<()> {
    let cli = <GitCacheCli as clap::Parser>::parse();
    let verbosity = cli.effective_verbosity();
    init_logging(verbosity);

    let cache_root = resolve_cache_root(cli.cache_dir)?;
    cli.command.execute(cache_root, verbosity >= 1)
}

/// gitcache - a shared local cache of bare git mirrors
#[derive(Parser, Debug)]
#[command(name = "gitcache")]
#[command(
    version,
    about = "Manage a shared local cache of bare git mirrors",
    long_about = "Maintains bare, object-only mirrors of remote git repositories under a \
    host-global cache directory, so collaborating checkouts can clone and fetch from local \
    disk instead of the network. Mirrors of well-known hosts can be bootstrapped from \
    pre-built archives in cloud storage."
)]
pub struct GitCacheCli {
    /// Path to the directory containing the cache
    #[arg(short = 'c', long = "cache-dir", global = true, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Increase verbosity (can be passed multiple times)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all extraneous output
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl GitCacheCli {
    /// Warnings by default; `-v` steps toward debug, `-q` forces errors
    /// only.
    pub fn effective_verbosity(&self) -> u8 {
        if self.quiet { 0 } else { 1 + self.verbose }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check whether a mirror of the given repo already exists
    ///
    /// Prints the mirror path and exits 0 when it does; exits 1 otherwise.
    Exists { url: String },

    /// Ensure the cache has all up-to-date objects for the given repo
    Populate {
        url: String,

        /// Only cache DEPTH commits of history
        #[arg(long, value_name = "DEPTH")]
        depth: Option<u32>,

        /// Only cache 10000 commits of history
        #[arg(long, short = 's')]
        shallow: bool,

        /// Specify additional refs to be fetched
        #[arg(long = "ref", value_name = "SPEC")]
        refs: Vec<String>,

        /// Don't bootstrap from the object store
        #[arg(long = "no-bootstrap")]
        no_bootstrap: bool,
    },

    /// Update mirrors behind this checkout's remotes, then fetch here
    Fetch {
        /// Fetch all remotes
        #[arg(long)]
        all: bool,

        /// Don't (re)bootstrap mirrors from the object store
        #[arg(long = "no-bootstrap")]
        no_bootstrap: bool,

        remotes: Vec<String>,
    },

    /// Create and upload a bootstrap archive for the given repo
    #[command(name = "update-bootstrap", alias = "update_bootstrap")]
    UpdateBootstrap {
        url: String,

        /// Prune all other archives of the same repo after uploading
        #[arg(long)]
        prune: bool,
    },
}

impl Commands {
    pub(crate) fn execute(self, cache_root: PathBuf, verbose: bool) -> Result<()> {
        match self {
            Commands::Exists { url } => {
                let mirror = Mirror::new(&url, &[], cache_root)?;
                if !mirror.exists() {
                    std::process::exit(1);
                }
                println!("{}", mirror.path().display());
                Ok(())
            }
            Commands::Populate { url, depth, shallow, refs, no_bootstrap } => {
                let mut mirror = Mirror::new(&url, &refs, cache_root)?;
                mirror.populate(PopulateOptions {
                    depth,
                    shallow,
                    bootstrap: !no_bootstrap,
                    verbose,
                })?;
                Ok(())
            }
            Commands::Fetch { all, no_bootstrap, remotes } => {
                fetch::run(cache_root, all, !no_bootstrap, remotes, verbose)
            }
            Commands::UpdateBootstrap { url, prune } => {
                if cfg!(windows) {
                    tools::error("update-bootstrap will not work on Windows.");
                    std::process::exit(1);
                }
                // The archive must capture a fresh fetch of the real
                // remote, not a copy of the previous archive.
                let mut mirror = Mirror::new(&url, &[], cache_root)?;
                mirror.populate(PopulateOptions {
                    bootstrap: false,
                    verbose,
                    ..Default::default()
                })?;
                mirror.update_bootstrap(prune)?;
                Ok(())
            }
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("gitcache={level}")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the cache root before any verb runs: an explicit flag wins
/// (with a warning when it disagrees with the configured value), then the
/// global `cache.cachepath` git config, else nothing runs at all.
fn resolve_cache_root(cli_override: Option<PathBuf>) -> Result<PathBuf, CacheError> {
    let global = Git::default().global_config("cache.cachepath").map(PathBuf::from);
    match (cli_override, global) {
        (Some(chosen), Some(global)) => {
            let differs = match (tools::canonicalize(&chosen), tools::canonicalize(&global)) {
                (Ok(a), Ok(b)) => a != b,
                _ => chosen != global,
            };
            if differs {
                tools::warn("Overriding globally-configured cache directory.");
            }
            Ok(chosen)
        }
        (Some(chosen), None) => Ok(chosen),
        (None, Some(global)) => Ok(global),
        (None, None) => Err(CacheError::ConfigMissing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_populate_flags() {
        let cli = GitCacheCli::try_parse_from([
            "gitcache",
            "populate",
            "https://example.com/repo",
            "--depth",
            "5",
            "--shallow",
            "--ref",
            "foo",
            "--ref",
            "refs/tags/v1",
            "--no-bootstrap",
        ])
        .unwrap();
        match cli.command {
            Commands::Populate { url, depth, shallow, refs, no_bootstrap } => {
                assert_eq!(url, "https://example.com/repo");
                assert_eq!(depth, Some(5));
                assert!(shallow);
                assert_eq!(refs, ["foo", "refs/tags/v1"]);
                assert!(no_bootstrap);
            }
            other => panic!("parsed into {other:?}"),
        }
    }

    #[test]
    fn global_flags_are_accepted_after_the_verb() {
        let cli = GitCacheCli::try_parse_from([
            "gitcache",
            "exists",
            "https://example.com/repo",
            "-c",
            "/tmp/cache",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(cli.effective_verbosity(), 3);
    }

    #[test]
    fn quiet_forces_verbosity_to_zero() {
        let cli = GitCacheCli::try_parse_from([
            "gitcache",
            "-q",
            "-v",
            "exists",
            "https://example.com/repo",
        ])
        .unwrap();
        assert_eq!(cli.effective_verbosity(), 0);
    }

    #[test]
    fn verbosity_defaults_to_warnings() {
        let cli =
            GitCacheCli::try_parse_from(["gitcache", "exists", "https://example.com/repo"])
                .unwrap();
        assert_eq!(cli.effective_verbosity(), 1);
    }

    #[test]
    fn rejects_unknown_verbs() {
        assert!(GitCacheCli::try_parse_from(["gitcache", "frobnicate"]).is_err());
    }
}
