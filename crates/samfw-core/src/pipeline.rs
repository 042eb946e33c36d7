//! One run, from "which device?" to unpacked param assets.
//!
//! ```txt
//! ListDevices -> SelectDevice -> ResolveIdentity -> ResolveVersion -> Acquire -> Extract
//! ```
//!
//! Every stage either hands its result to the next one or ends the run.
//! There are no retries and nothing is rolled back.
//! Two runs against the same `work_root` and model at once are not supported;
//! keeping that from happening is up to the caller.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::acquire::{self, Downloader};
use crate::adb::{DeviceBridge, DeviceSerial};
use crate::error::Error;
use crate::extract::{self, ArchiveTools, ExtractReport, FirmwareTree};
use crate::identity::{self, DeviceIdentity};
use crate::metadata::{FirmwareVersion, VersionSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ListDevices,
    SelectDevice,
    ResolveIdentity,
    ResolveVersion,
    Acquire,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ListDevices => "listing devices",
            Self::SelectDevice => "device selection",
            Self::ResolveIdentity => "device identification",
            Self::ResolveVersion => "firmware version lookup",
            Self::Acquire => "firmware download",
            Self::Extract => "firmware extraction",
        })
    }
}

/// The interactive side of a run: picks the device and hears about progress.
pub trait Frontend {
    /// Index into `devices` of the one to use; `None` aborts the run.
    fn select_device(&mut self, devices: &[DeviceSerial]) -> Option<usize>;

    fn stage_started(&mut self, _stage: Stage) {}
    fn device_selected(&mut self, _device: &DeviceSerial) {}
    fn identity_resolved(&mut self, _identity: &DeviceIdentity) {}
    fn version_resolved(&mut self, _version: &FirmwareVersion) {}
    fn archive_ready(&mut self, _archive: &Path) {}
}

/// Everything a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub device: DeviceSerial,
    pub identity: DeviceIdentity,
    pub version: FirmwareVersion,
    pub archive: PathBuf,
    pub tree: FirmwareTree,
    pub extraction: ExtractReport,
}

#[derive(Debug)]
pub enum Outcome {
    Success(Box<Report>),
    Failed { stage: Stage, error: Error },
}

impl Outcome {
    #[must_use]
    pub const fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Success(_) => None,
            Self::Failed { stage, .. } => Some(*stage),
        }
    }
}

/// The collaborators of a run, each behind its trait so they can be swapped.
#[derive(Debug)]
pub struct Pipeline<B, V, D, T> {
    pub bridge: B,
    pub versions: V,
    pub downloader: D,
    pub tools: T,
    pub work_root: PathBuf,
}

impl<B, V, D, T> Pipeline<B, V, D, T>
where
    B: DeviceBridge,
    V: VersionSource,
    D: Downloader,
    T: ArchiveTools,
{
    /// Run every stage in order, stopping at the first failure.
    pub fn run(&self, ui: &mut impl Frontend) -> Outcome {
        match self.try_run(ui) {
            Ok(report) => {
                info!("Firmware for {} ready", report.identity.model);
                Outcome::Success(Box::new(report))
            }
            Err((stage, error)) => {
                error!("Failed at {stage}: {error}");
                Outcome::Failed { stage, error }
            }
        }
    }

    fn try_run(&self, ui: &mut impl Frontend) -> Result<Report, (Stage, Error)> {
        let at = |stage: Stage| move |e: Error| (stage, e);

        ui.stage_started(Stage::ListDevices);
        let devices = identity::list_devices(&self.bridge);
        if devices.is_empty() {
            return Err((
                Stage::ListDevices,
                Error::DeviceEnumeration(
                    "no devices found, make sure USB debugging is enabled and authorized".into(),
                ),
            ));
        }
        info!("{} device(s) ready", devices.len());

        ui.stage_started(Stage::SelectDevice);
        let device = ui
            .select_device(&devices)
            .and_then(|i| devices.get(i))
            .cloned()
            .ok_or((Stage::SelectDevice, Error::NoSelection))?;
        info!("Selected device: {device}");
        ui.device_selected(&device);

        ui.stage_started(Stage::ResolveIdentity);
        let identity =
            identity::resolve(&self.bridge, &device).map_err(at(Stage::ResolveIdentity))?;
        ui.identity_resolved(&identity);

        ui.stage_started(Stage::ResolveVersion);
        let version = self
            .versions
            .fetch_latest_version(&identity.csc, &identity.model)
            .map_err(at(Stage::ResolveVersion))?;
        ui.version_resolved(&version);

        ui.stage_started(Stage::Acquire);
        let tree = FirmwareTree::new(&self.work_root, &identity.model);
        let archive = acquire::download(&self.downloader, &identity, &version, &tree.downloads)
            .map_err(at(Stage::Acquire))?;
        ui.archive_ready(&archive);

        ui.stage_started(Stage::Extract);
        let extraction = extract::extract_firmware(&self.tools, &tree, &archive, &identity.model)
            .map_err(at(Stage::Extract))?;

        Ok(Report {
            device,
            identity,
            version,
            archive,
            tree,
            extraction,
        })
    }
}
