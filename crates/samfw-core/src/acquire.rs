//! Fetching the firmware archive through an external downloader.
//!
//! The downloader picks its own output file name, so after it exits the
//! newest `.zip` in the output directory is taken as its product.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use crate::metadata::FirmwareVersion;
use crate::process::{self, Streams};

/// Extension of the archives the downloader produces.
pub const ARCHIVE_EXT: &str = "zip";

/// Something that can put a firmware archive into a directory.
pub trait Downloader {
    /// Download `version` for `identity` into `out_dir`, which must exist.
    fn download(
        &self,
        identity: &DeviceIdentity,
        version: &FirmwareVersion,
        out_dir: &Path,
    ) -> Result<()>;
}

/// A downloader CLI, described by its program and an argument template.
///
/// Each template argument may contain `{model}`, `{region}`, `{imei}`,
/// `{version}`; an argument equal to `{out}` is replaced by the output directory.
/// Substitution happens per argument, nothing is ever handed to a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalDownloader {
    pub program: String,
    pub args: Vec<String>,
    /// Seconds; `0` waits forever.
    pub timeout_secs: u64,
}

impl Default for ExternalDownloader {
    fn default() -> Self {
        Self {
            program: "samloader".into(),
            args: [
                "-m", "{model}", "-r", "{region}", "-i", "{imei}", "download", "-v",
                "{version}", "-O", "{out}",
            ]
            .map(String::from)
            .to_vec(),
            timeout_secs: 4 * 60 * 60,
        }
    }
}

impl ExternalDownloader {
    /// Expanded argument list for one download.
    #[must_use]
    pub fn render_args(
        &self,
        identity: &DeviceIdentity,
        version: &FirmwareVersion,
        out_dir: &Path,
    ) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                if arg == "{out}" {
                    out_dir.as_os_str().to_owned()
                } else {
                    arg.replace("{model}", identity.model.as_str())
                        .replace("{region}", identity.csc.as_str())
                        .replace("{imei}", identity.imei.as_str())
                        .replace("{version}", version.as_str())
                        .into()
                }
            })
            .collect()
    }

    fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Downloader for ExternalDownloader {
    fn download(
        &self,
        identity: &DeviceIdentity,
        version: &FirmwareVersion,
        out_dir: &Path,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(identity, version, out_dir));
        process::run(cmd, Streams::Inherit, self.timeout())
            .map_err(|e| Error::Acquisition(e.to_string()))?;
        Ok(())
    }
}

/// Run `downloader` into `out_dir` (created if needed) and return the archive it produced.
pub fn download(
    downloader: &impl Downloader,
    identity: &DeviceIdentity,
    version: &FirmwareVersion,
    out_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)?;
    info!(
        "Downloading firmware for {}, CSC {}, version {version}...",
        identity.model, identity.csc
    );
    downloader.download(identity, version, out_dir)?;
    let archive = find_most_recent_archive(out_dir)?;
    info!("Firmware download complete: {}", archive.display());
    Ok(archive)
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXT))
}

/// Newest `.zip` in `dir` by modification time.
/// Equal timestamps are broken by the greater file name, so the choice is stable.
pub fn find_most_recent_archive(dir: &Path) -> Result<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if !meta.is_file() || !is_archive(&path) {
            continue;
        }
        let modified = meta.modified()?;
        debug!("Archive candidate {} ({modified:?})", path.display());

        let newer = newest.as_ref().is_none_or(|(t, p)| {
            (modified, path.file_name()) > (*t, p.file_name())
        });
        if newer {
            newest = Some((modified, path));
        }
    }

    newest.map(|(_, p)| p).ok_or_else(|| {
        Error::Acquisition(format!(
            "no .{ARCHIVE_EXT} archive found in {}",
            dir.display()
        ))
    })
}
