use color_eyre::Report;

#[derive(thiserror::Error, Debug)]
/// Cache error type
pub enum CacheError {
    /// No cache path on the command line and none in the global git config
    #[error("no cache path configured: pass --cache-dir or set `git config --global cache.cachepath`")]
    ConfigMissing,

    /// A git child process exited nonzero
    #[error("git exited with code {0}")]
    Vcs(i32),

    /// An object-store child process exited nonzero
    #[error("gsutil exited with code {0}")]
    ObjectStore(i32),

    /// Structural evidence that the on-disk mirror is unusable
    #[error("git cache mirror is corrupt and must be rebuilt")]
    ClobberNeeded,

    /// Mirror host is not on the bootstrap allowlist
    #[error("no bootstrap bucket is known for {0}")]
    Unsupported(String),

    /// Io related errors
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// Catch-all for general errors
    #[error(transparent)]
    General(#[from] Report),
}

impl CacheError {
    /// Filesystem errors are the retryable kind at rename/remove sites,
    /// where background indexers race with us on some platforms.
    pub fn is_transient_fs(&self) -> bool {
        matches!(self, CacheError::Io(_))
    }
}
