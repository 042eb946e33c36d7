//! Unwrapping a downloaded firmware down to the assets inside `param.bin`.
//!
//! ```txt
//! <model>_<csc>.zip
//! └── BL_<bare model>*.tar.md5           (unzip)
//!     └── param.bin.lz4                  (tar)
//!         └── param.bin                  (lz4)
//!             └── *.jpg, *.qmg, ...      (7z, twice)
//! ```
//!
//! The actual unpacking is done by external tools behind [`ArchiveTools`].
//! This module only decides what goes where, and in which order.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Error, ExtractStep, Result, ToolError};
use crate::identity::Model;
use crate::process::{self, Streams};

pub const BL_PREFIX: &str = "BL_";
pub const BL_EXT: &str = ".tar.md5";
pub const PARAM_LZ4: &str = "param.bin.lz4";
pub const PARAM_IMAGE: &str = "param.bin";
/// Written into the pristine directory once its extraction has fully succeeded.
pub const PRISTINE_MARKER: &str = ".complete";

/// Where every stage of one model's firmware lives, below `<root>/firmware/<model>/`.
///
/// Nothing in here is ever deleted by this crate, so every directory may hold
/// leftovers from earlier runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareTree {
    /// Downloaded archives
    pub downloads: PathBuf,
    /// Contents of the downloaded archive
    pub extracted: PathBuf,
    /// Contents of the `BL_` tarball
    pub bl_extracted: PathBuf,
    /// Decompressed `param.bin`
    pub param_extracted: PathBuf,
    /// Reference copy of the param assets, written once and then left alone
    pub pristine: PathBuf,
    /// Param assets meant to be edited; safe to throw away
    pub customizable: PathBuf,
}

impl FirmwareTree {
    #[must_use]
    pub fn new(work_root: &Path, model: &Model) -> Self {
        let downloads = work_root.join("firmware").join(model.as_str());
        Self {
            extracted: downloads.join("extracted"),
            bl_extracted: downloads.join("bl_extracted"),
            param_extracted: downloads.join("param_extracted"),
            pristine: downloads.join("param-assets_extracted"),
            customizable: downloads.join("param-assets_customizable"),
            downloads,
        }
    }
}

/// The unpacking primitives the chain needs.
pub trait ArchiveTools {
    /// Member names of a zip archive, one per entry.
    fn zip_entries(&self, archive: &Path) -> Result<Vec<String>, ToolError>;
    /// Expand a zip archive into `dest`, overwriting existing files.
    fn unzip(&self, archive: &Path, dest: &Path) -> Result<(), ToolError>;
    /// Member names of a tarball, one per entry.
    fn tar_entries(&self, archive: &Path) -> Result<Vec<String>, ToolError>;
    /// Extract a tarball into `dest`.
    fn untar(&self, archive: &Path, dest: &Path) -> Result<(), ToolError>;
    /// Decompress a single LZ4 frame from `input` into the file `output`.
    fn lz4_decompress(&self, input: &Path, output: &Path) -> Result<(), ToolError>;
    /// Extract any format 7-Zip understands into `dest`.
    fn extract_any(&self, input: &Path, dest: &Path) -> Result<(), ToolError>;
}

/// [`ArchiveTools`] backed by the usual command-line programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemTools {
    pub unzip: String,
    pub tar: String,
    pub lz4: String,
    pub sevenzip: String,
    /// Seconds per tool invocation; `0` waits forever.
    pub timeout_secs: u64,
}

impl Default for SystemTools {
    fn default() -> Self {
        Self {
            unzip: "unzip".into(),
            tar: "tar".into(),
            lz4: "lz4".into(),
            sevenzip: "7z".into(),
            timeout_secs: 30 * 60,
        }
    }
}

impl SystemTools {
    fn output(
        &self,
        program: &str,
        args: impl IntoIterator<Item = OsString>,
    ) -> Result<String, ToolError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        let timeout = (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs));
        process::run(cmd, Streams::Capture, timeout)
    }

    fn run(&self, program: &str, args: impl IntoIterator<Item = OsString>) -> Result<(), ToolError> {
        self.output(program, args).map(drop)
    }

    fn listing(
        &self,
        program: &str,
        args: impl IntoIterator<Item = OsString>,
    ) -> Result<Vec<String>, ToolError> {
        Ok(self
            .output(program, args)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

fn os(s: &str) -> OsString {
    s.into()
}

impl ArchiveTools for SystemTools {
    fn zip_entries(&self, archive: &Path) -> Result<Vec<String>, ToolError> {
        // zipinfo mode, bare names
        self.listing(&self.unzip, [os("-Z1"), archive.into()])
    }

    fn unzip(&self, archive: &Path, dest: &Path) -> Result<(), ToolError> {
        self.run(
            &self.unzip,
            [os("-o"), os("-q"), archive.into(), os("-d"), dest.into()],
        )
    }

    fn tar_entries(&self, archive: &Path) -> Result<Vec<String>, ToolError> {
        self.listing(&self.tar, [os("-tf"), archive.into()])
    }

    fn untar(&self, archive: &Path, dest: &Path) -> Result<(), ToolError> {
        self.run(&self.tar, [os("-xf"), archive.into(), os("-C"), dest.into()])
    }

    fn lz4_decompress(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        self.run(&self.lz4, [os("-d"), os("-f"), input.into(), output.into()])
    }

    fn extract_any(&self, input: &Path, dest: &Path) -> Result<(), ToolError> {
        // 7z wants the output dir glued to its switch
        let mut out_switch = os("-o");
        out_switch.push(dest);
        self.run(&self.sevenzip, [os("x"), os("-y"), out_switch, input.into()])
    }
}

/// What [`extract_firmware`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    pub bootloader: PathBuf,
    pub param_image: PathBuf,
    pub pristine: PathBuf,
    pub customizable: PathBuf,
    /// The pristine copy already existed and was left untouched.
    pub pristine_kept: bool,
}

/// Pick the bootloader tarball among `names`: `BL_<bare model>...tar.md5`.
///
/// Only top-level entries count. Exactly one must match: none or several
/// is an error naming what was found.
pub fn select_bootloader<'a, S: AsRef<str>>(
    names: &'a [S],
    bare_model: &str,
) -> Result<&'a str, String> {
    let prefix = format!("{BL_PREFIX}{bare_model}");
    let mut matches: Vec<&str> = names
        .iter()
        .map(|n| n.as_ref())
        .filter(|n| !n.contains('/') && n.starts_with(&prefix) && n.ends_with(BL_EXT))
        .collect();
    matches.sort_unstable();

    match matches.as_slice() {
        [one] => Ok(*one),
        [] => Err(format!("no {prefix}*{BL_EXT} in the archive")),
        several => Err(format!("several bootloader archives match: {several:?}")),
    }
}

fn has_member(entries: &[String], name: &str) -> bool {
    entries
        .iter()
        .any(|e| e.strip_prefix("./").unwrap_or(e) == name)
}

/// Mark every file below `dir` read-only.
fn freeze(dir: &Path) -> Result<()> {
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            let mut perms = entry.metadata().map_err(std::io::Error::from)?.permissions();
            perms.set_readonly(true);
            fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}

fn at_step<T>(step: ExtractStep, res: Result<T, ToolError>) -> Result<T> {
    res.map_err(|e| Error::extraction(step, e))
}

/// Run the whole unwrap chain on `archive`. Stops at the first failing step;
/// intermediate results stay on disk.
pub fn extract_firmware(
    tools: &impl ArchiveTools,
    tree: &FirmwareTree,
    archive: &Path,
    model: &Model,
) -> Result<ExtractReport> {
    info!("Extracting {}", archive.display());
    // `extracted/` and `bl_extracted/` keep earlier runs' files, so every
    // decision below is made on this run's archive listings.
    let entries = at_step(ExtractStep::Outer, tools.zip_entries(archive))?;
    let bl_name = select_bootloader(&entries, model.bare())
        .map_err(|reason| Error::extraction(ExtractStep::SelectBootloader, reason))?;

    fs::create_dir_all(&tree.extracted)?;
    at_step(ExtractStep::Outer, tools.unzip(archive, &tree.extracted))?;
    let bootloader = tree.extracted.join(bl_name);
    info!("Bootloader archive: {}", bootloader.display());

    let bl_entries = at_step(ExtractStep::Bootloader, tools.tar_entries(&bootloader))?;
    if !has_member(&bl_entries, PARAM_LZ4) {
        return Err(Error::extraction(
            ExtractStep::DecompressParam,
            format!("{PARAM_LZ4} not in {}", bootloader.display()),
        ));
    }
    fs::create_dir_all(&tree.bl_extracted)?;
    at_step(ExtractStep::Bootloader, tools.untar(&bootloader, &tree.bl_extracted))?;

    let compressed = tree.bl_extracted.join(PARAM_LZ4);
    if !compressed.is_file() {
        return Err(Error::extraction(
            ExtractStep::DecompressParam,
            format!("{} not found", compressed.display()),
        ));
    }
    fs::create_dir_all(&tree.param_extracted)?;
    let param_image = tree.param_extracted.join(PARAM_IMAGE);
    at_step(
        ExtractStep::DecompressParam,
        tools.lz4_decompress(&compressed, &param_image),
    )?;
    info!("Decompressed {}", param_image.display());

    let marker = tree.pristine.join(PRISTINE_MARKER);
    let pristine_kept = marker.is_file();
    if pristine_kept {
        info!(
            "Keeping existing reference assets in {}",
            tree.pristine.display()
        );
    } else {
        if tree.pristine.exists() {
            warn!(
                "Reference assets in {} are incomplete, extracting again",
                tree.pristine.display()
            );
        }
        fs::create_dir_all(&tree.pristine)?;
        at_step(
            ExtractStep::UnpackParam,
            tools.extract_any(&param_image, &tree.pristine),
        )?;
        freeze(&tree.pristine)?;
        fs::write(&marker, b"")?;
    }

    fs::create_dir_all(&tree.customizable)?;
    at_step(
        ExtractStep::UnpackParam,
        tools.extract_any(&param_image, &tree.customizable),
    )?;
    info!("Customizable assets in {}", tree.customizable.display());

    Ok(ExtractReport {
        bootloader,
        param_image,
        pristine: tree.pristine.clone(),
        customizable: tree.customizable.clone(),
        pristine_kept,
    })
}
