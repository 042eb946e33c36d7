use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Which identity lookup failed. Each one reports on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    RegionalCode,
    Model,
    Imei,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RegionalCode => "CSC code",
            Self::Model => "model",
            Self::Imei => "IMEI",
        })
    }
}

/// One of the five unwrap steps of the extraction chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStep {
    Outer,
    SelectBootloader,
    Bootloader,
    DecompressParam,
    UnpackParam,
}

impl fmt::Display for ExtractStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Outer => "outer archive",
            Self::SelectBootloader => "bootloader selection",
            Self::Bootloader => "bootloader archive",
            Self::DecompressParam => "param decompression",
            Self::UnpackParam => "param unpack",
        })
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Request failed: {0}")]
    Network(String),
    #[error("Server answered with HTTP {0}")]
    Status(u16),
    #[error("Malformed XML: {0}")]
    Xml(String),
    #[error("No firmware/version/latest element in metadata")]
    MissingElement,
    #[error("Unusable version string {0:?}")]
    BadVersion(String),
}

/// Failure of an external program.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Cannot run `{program}`, likely not found: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {code}: {stderr}")]
    Status {
        program: String,
        code: String,
        stderr: String,
    },
    #[error("`{program}` timed out after {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot enumerate devices: {0}")]
    DeviceEnumeration(String),
    #[error("No device was selected")]
    NoSelection,
    #[error("Cannot retrieve {what}: {reason}")]
    Identity { what: IdentityField, reason: String },
    #[error("Cannot resolve latest firmware version: {0}")]
    Metadata(#[from] MetadataError),
    #[error("Firmware acquisition failed: {0}")]
    Acquisition(String),
    #[error("Extraction failed at {step}: {reason}")]
    Extraction { step: ExtractStep, reason: String },
    #[error("Invalid configuration in {path}: {reason}")]
    Config { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn identity(what: IdentityField, reason: impl Into<String>) -> Self {
        Self::Identity {
            what,
            reason: reason.into(),
        }
    }

    pub(crate) fn extraction(step: ExtractStep, reason: impl fmt::Display) -> Self {
        Self::Extraction {
            step,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
