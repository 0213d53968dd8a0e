//! Archive extractors for bootstrap zips.
//!
//! Host tools are preferred for speed, but several platform extractors
//! silently truncate archives past 4 GiB and bootstrap archives routinely
//! exceed that, so the in-process zip reader always sits at the tail of
//! the candidate list as the safety net.

use std::fs::File;
use std::path::Path;
use std::process::Command;

use color_eyre::eyre::{Context as _, Result, eyre};

const TARGET: &str = "gitcache::extract";

const ZIP64_THRESHOLD: u64 = 4 * 1024 * 1024 * 1024;

pub trait Extractor {
    fn name(&self) -> &'static str;
    /// Whether the tool exists on this host at all.
    fn available(&self) -> bool;
    /// Whether the tool can handle an archive of `size` bytes.
    fn can_extract(&self, size: u64) -> bool;
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// 7-Zip, the preferred tool on Windows hosts.
pub struct SevenZip;

impl Extractor for SevenZip {
    fn name(&self) -> &'static str {
        "7z"
    }

    fn available(&self) -> bool {
        cfg!(windows) && which::which("7z").is_ok()
    }

    fn can_extract(&self, _size: u64) -> bool {
        true
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        run_tool(
            Command::new("7z")
                .arg("x")
                .arg(format!("-o{}", dest.display()))
                .arg("-tzip")
                .arg(archive),
        )
    }
}

/// The system `unzip`, preferred on Unix hosts.
pub struct SystemUnzip;

impl Extractor for SystemUnzip {
    fn name(&self) -> &'static str {
        "unzip"
    }

    fn available(&self) -> bool {
        cfg!(unix) && which::which("unzip").is_ok()
    }

    fn can_extract(&self, size: u64) -> bool {
        // The unzip shipped with macOS predates zip64.
        if cfg!(target_os = "macos") { size < ZIP64_THRESHOLD } else { true }
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        run_tool(Command::new("unzip").arg(archive).arg("-d").arg(dest))
    }
}

/// In-process zip reader; always usable, any size.
pub struct BuiltinZip;

impl Extractor for BuiltinZip {
    fn name(&self) -> &'static str {
        "zip crate"
    }

    fn available(&self) -> bool {
        true
    }

    fn can_extract(&self, _size: u64) -> bool {
        true
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let file = File::open(archive)
            .wrap_err_with(|| format!("failed to open archive {}", archive.display()))?;
        let mut zip = zip::ZipArchive::new(file)
            .wrap_err_with(|| format!("failed to read archive {}", archive.display()))?;
        zip.extract(dest)
            .wrap_err_with(|| format!("failed to extract into {}", dest.display()))?;
        Ok(())
    }
}

/// Pick the first extractor whose prerequisites are met for an archive of
/// `size` bytes.
pub fn select(size: u64) -> Box<dyn Extractor> {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            let candidates: [Box<dyn Extractor>; 2] = [Box::new(SevenZip), Box::new(BuiltinZip)];
        } else {
            let candidates: [Box<dyn Extractor>; 2] = [Box::new(SystemUnzip), Box::new(BuiltinZip)];
        }
    }
    for candidate in candidates {
        if candidate.available() && candidate.can_extract(size) {
            tracing::debug!(target: TARGET, "using {} extractor", candidate.name());
            return candidate;
        }
    }
    Box::new(BuiltinZip)
}

fn run_tool(cmd: &mut Command) -> Result<()> {
    let status = cmd.status().wrap_err("failed to launch extractor")?;
    if status.success() { Ok(()) } else { Err(eyre!("extractor exited with {status}")) }
}
