//! Thin driver over the external `git` executable.
//!
//! Object transfer, packing, and ref management all stay in the child
//! process; this module only builds command lines, forwards output into
//! the log, and turns nonzero exits into [`CacheError::Vcs`].

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::retry;
use crate::types::CacheError;

const TARGET: &str = "gitcache::git";

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        const GIT_EXE: &str = "git.bat";
    } else {
        const GIT_EXE: &str = "git";
    }
}

/// Forced into every child so credential prompts can never block a batch
/// run.
const ASKPASS_ENV: [(&str, &str); 2] = [("GIT_ASKPASS", "true"), ("SSH_ASKPASS", "true")];

/// Wrapper around the external git executable.
#[derive(Debug, Clone, Copy)]
pub struct Git {
    exe: &'static str,
}

impl Default for Git {
    fn default() -> Self {
        Git { exe: GIT_EXE }
    }
}

impl Git {
    /// Substitute the executable, so tests can drive the engine's failure
    /// and success paths without a real repository.
    #[cfg(test)]
    pub(crate) fn with_exe(exe: &'static str) -> Self {
        Git { exe }
    }

    fn command(self, args: &[&str], cwd: &Path) -> Command {
        let mut cmd = Command::new(self.exe);
        cmd.args(args).current_dir(cwd);
        for (key, value) in ASKPASS_ENV {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run git in `cwd`, streaming its stdout into the log.
    pub fn run(self, args: &[&str], cwd: &Path) -> Result<(), CacheError> {
        tracing::info!(
            target: TARGET,
            "running \"git {}\" in \"{}\"",
            args.join(" "),
            cwd.display()
        );
        let mut child = self.command(args, cwd).stdout(Stdio::piped()).spawn()?;
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                tracing::debug!(target: TARGET, "{}", line?);
            }
        }
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(CacheError::Vcs(status.code().unwrap_or(-1)))
        }
    }

    /// Run git under the retry policy, with [`CacheError::Vcs`] as the
    /// retryable kind. Used for fetches, which fail transiently.
    pub fn run_retried(self, args: &[&str], cwd: &Path) -> Result<(), CacheError> {
        let name = format!("git {}", args.join(" "));
        retry::with_backoff(&name, || self.run(args, cwd), |err| matches!(err, CacheError::Vcs(_)))
    }

    /// Capture the trimmed stdout of a read-only git query.
    pub fn output(self, args: &[&str], cwd: &Path) -> Result<String, CacheError> {
        tracing::debug!(
            target: TARGET,
            "querying \"git {}\" in \"{}\"",
            args.join(" "),
            cwd.display()
        );
        let out = self.command(args, cwd).stderr(Stdio::null()).output()?;
        if !out.status.success() {
            return Err(CacheError::Vcs(out.status.code().unwrap_or(-1)));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Run git with all stdio inherited, for user-facing fetches inside a
    /// checkout.
    pub fn passthrough(self, args: &[&str], cwd: &Path) -> Result<(), CacheError> {
        let status = self.command(args, cwd).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(CacheError::Vcs(status.code().unwrap_or(-1)))
        }
    }

    /// Read a key from the user's global git configuration. Unset, empty,
    /// and unreadable all come back as `None`.
    pub fn global_config(self, key: &str) -> Option<String> {
        let mut cmd = Command::new(self.exe);
        cmd.args(["config", "--global", key]);
        for (k, v) in ASKPASS_ENV {
            cmd.env(k, v);
        }
        let out = cmd.stderr(Stdio::null()).output().ok()?;
        if !out.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&out.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}
