#![deny(clippy::unwrap_used)]

//! This module groups everything that's "intrinsic" of ADB, the device bridge.
//!
//! `*Command` types are thin wrappers around `adb_client` or the system ADB CLI:
//! - no "magic"
//! - no chaining ("piping") of existing commands
//! - one method per ADB command
//!
//! Shell commands are passed as argument lists, never as pre-joined strings.
//! Anything that could end up on a command line must already be a validated
//! type (see [`DeviceSerial`]).
//!
//! ## Backend Selection
//!
//! - **Builtin** (`adb_client`): Pure Rust implementation, no external dependencies
//! - **System**: Uses the system-installed `adb` binary
//!
//! `adb root` always goes through the system binary: `adb_client` has no
//! request for it.
//!
//! The rest of the crate only sees the [`DeviceBridge`] trait,
//! which [`AdbBackend`] implements by dispatching to [`ACommand`].
//!
//! For comprehensive info about ADB,
//! [see this](https://android.googlesource.com/platform/packages/modules/adb/+/refs/heads/master/docs/)

use std::fmt;
use std::io::Cursor;
use std::process::Command;
use std::time::Duration;

use adb_client::{ADBDeviceExt, ADBServer};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::process::{self, Streams};
use crate::utils::is_all_alnum_or;

/// Upper bound for a single `adb` invocation through the system binary.
const SYSTEM_ADB_TIMEOUT: Duration = Duration::from_secs(60);

/// ADB backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdbBackend {
    /// Built-in ADB implementation via `adb_client` crate.
    /// Talks to the ADB server directly; `adb` needn't be in PATH.
    #[default]
    Builtin,
    /// Uses the system-installed `adb` binary.
    System,
}

impl fmt::Display for AdbBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => write!(f, "Builtin"),
            Self::System => write!(f, "System (adb)"),
        }
    }
}

/// String with the invariant of being a plausible ADB serial:
/// non-empty, ASCII alphanumerics plus `.`, `_`, `-` and `:`
/// (the latter for TCP/IP devices such as `192.168.1.7:5555`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceSerial(Box<str>);

impl DeviceSerial {
    #[must_use]
    pub fn new(serial: &str) -> Option<Self> {
        if !serial.is_empty() && is_all_alnum_or(serial.as_bytes(), b"._-:") {
            Some(Self(serial.into()))
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two bridge operations the pipeline consumes, plus elevation.
///
/// Errors are human-readable strings, as reported by ADB.
pub trait DeviceBridge {
    /// Header-less `(serial, status)` pairs, in ADB's order.
    fn devices(&self) -> Result<Vec<(String, String)>, String>;

    /// Run `args` in the device's default shell, returning trimmed stdout.
    fn shell(&self, serial: &DeviceSerial, args: &[&str]) -> Result<String, String>;

    /// Restart `adbd` with root permissions.
    fn root(&self, serial: &DeviceSerial) -> Result<String, String>;
}

impl DeviceBridge for AdbBackend {
    fn devices(&self) -> Result<Vec<(String, String)>, String> {
        ACommand::with_backend(*self).devices()
    }

    fn shell(&self, serial: &DeviceSerial, args: &[&str]) -> Result<String, String> {
        ACommand::with_backend(*self).shell(serial).raw(args)
    }

    fn root(&self, serial: &DeviceSerial) -> Result<String, String> {
        ACommand::with_backend(*self).root(serial)
    }
}

/// Internal state for `ACommand` - tracks the device serial and backend to use
#[derive(Debug)]
struct ACommandState {
    device_serial: Option<DeviceSerial>,
    backend: AdbBackend,
}

/// Builder object for an Android Debug Bridge command.
///
/// Only models the subset of ADB this crate needs.
///
/// [More info here](https://developer.android.com/tools/adb)
#[derive(Debug)]
pub struct ACommand(ACommandState);

impl ACommand {
    /// `adb` command builder with a specific backend
    #[must_use]
    pub fn with_backend(backend: AdbBackend) -> Self {
        Self(ACommandState {
            device_serial: None,
            backend,
        })
    }

    /// `shell` sub-command builder, scoped to `device_serial`.
    #[must_use]
    pub fn shell(mut self, device_serial: &DeviceSerial) -> ShellCommand {
        self.0.device_serial = Some(device_serial.clone());
        ShellCommand(self)
    }

    /// Header-less list of attached devices (as serials) and their statuses.
    ///
    /// Status can be (but not limited to):
    /// - "unauthorized"
    /// - "offline"
    /// - "device"
    pub fn devices(self) -> Result<Vec<(String, String)>, String> {
        match self.0.backend {
            AdbBackend::Builtin => Self::devices_builtin(),
            AdbBackend::System => Self::devices_system(),
        }
    }

    /// `adb -s <serial> root`, through the system binary whatever the backend.
    ///
    /// Production builds of Android refuse this, and without `adb` in PATH
    /// it can't even be asked; callers should treat failure as informational.
    pub fn root(self, device_serial: &DeviceSerial) -> Result<String, String> {
        if self.0.backend == AdbBackend::Builtin {
            debug!("Builtin backend can't request root, falling back to the adb binary");
        }
        Self::run_system_command(Self::root_command(device_serial))
    }

    fn root_command(device_serial: &DeviceSerial) -> Command {
        let mut cmd = Command::new("adb");
        cmd.args(["-s", device_serial.as_str(), "root"]);
        cmd
    }

    // ========== Builtin backend implementation (adb_client) ==========

    /// List devices using the builtin `adb_client`
    fn devices_builtin() -> Result<Vec<(String, String)>, String> {
        let mut server = ADBServer::default();
        server
            .devices()
            .map(|device_list| {
                device_list
                    .into_iter()
                    .map(|dev| (dev.identifier, dev.state.to_string()))
                    .collect()
            })
            .map_err(|e| {
                error!("ADB: {e}");
                format!("Cannot connect to ADB server: {e}")
            })
    }

    /// Execute a shell command via `adb_client` (builtin backend)
    ///
    /// Unlike the system binary, the ADB shell protocol used here doesn't carry
    /// the remote exit status: a failing command still returns `Ok`, with its
    /// error message as output. Callers must validate what they get back.
    fn run_shell_command_builtin(&self, args: &[&str]) -> Result<String, String> {
        let Some(ref serial) = self.0.device_serial else {
            return Err("No device selected".into());
        };
        if args.is_empty() {
            return Err("Empty shell command".into());
        }

        let mut server = ADBServer::default();
        let mut device = server
            .get_device_by_name(serial.as_str())
            .map_err(|e| format!("Cannot connect to device '{serial}': {e}"))?;

        info!("Ran command: adb -s {serial} shell {}", args.join(" "));

        let mut buffer = Vec::new();
        device
            .shell_command(args, &mut Cursor::new(&mut buffer))
            .map_err(|e| {
                error!("ADB shell command failed: {e}");
                format!("Shell command failed: {e}")
            })?;

        Ok(process::to_trimmed_utf8(&buffer))
    }

    // ========== System backend implementation (adb binary) ==========

    /// List devices using the system `adb` binary
    fn devices_system() -> Result<Vec<(String, String)>, String> {
        let mut cmd = Command::new("adb");
        cmd.arg("devices");
        Ok(Self::run_system_command(cmd)?
            .lines()
            .skip(1) // header
            .filter_map(|line| {
                let mut cols = line.split_whitespace();
                let serial = cols.next()?;
                let status = cols.next()?;
                Some((serial.to_string(), status.to_string()))
            })
            .collect())
    }

    /// Execute a shell command via system `adb` binary
    fn run_shell_command_system(&self, args: &[&str]) -> Result<String, String> {
        let mut cmd = Command::new("adb");

        if let Some(ref serial) = self.0.device_serial {
            cmd.args(["-s", serial.as_str()]);
        }

        cmd.arg("shell");
        cmd.args(args);

        Self::run_system_command(cmd)
    }

    /// General system command executor for adb binary
    fn run_system_command(cmd: Command) -> Result<String, String> {
        process::run(cmd, Streams::Capture, Some(SYSTEM_ADB_TIMEOUT)).map_err(|e| {
            error!("ADB: {e}");
            match e {
                crate::error::ToolError::Status { stderr, .. } => stderr,
                other => other.to_string(),
            }
        })
    }

    /// Execute a shell command using the configured backend
    fn run_shell_command(&self, args: &[&str]) -> Result<String, String> {
        match self.0.backend {
            AdbBackend::Builtin => self.run_shell_command_builtin(args),
            AdbBackend::System => self.run_shell_command_system(args),
        }
    }
}

/// Builder object for a command that runs on the device's default `sh` implementation.
/// Typically MKSH, but could be Ash.
///
/// [More info](https://chromium.googlesource.com/aosp/platform/system/core/+/refs/heads/upstream/shell_and_utilities).
#[derive(Debug)]
pub struct ShellCommand(ACommand);

impl ShellCommand {
    /// Execute an argument list on the device's default shell.
    /// ADB joins the arguments with spaces before the remote shell sees them,
    /// so none of them may come from untrusted input.
    pub fn raw(self, args: &[&str]) -> Result<String, String> {
        self.0.run_shell_command(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_serials() {
        for s in ["", " ", "abc 123", "abc;reboot", "$(id)", "a\tb", "dev\n"] {
            assert_eq!(DeviceSerial::new(s), None, "{s:?}");
        }
    }

    #[test]
    fn valid_serials() {
        for s in ["R58M123ABC", "emulator-5554", "192.168.1.7:5555", "adb_x.y"] {
            assert_eq!(DeviceSerial::new(s).map(|d| d.to_string()), Some(s.into()));
        }
    }

    #[test]
    fn backend_display() {
        assert_eq!(AdbBackend::Builtin.to_string(), "Builtin");
        assert_eq!(AdbBackend::System.to_string(), "System (adb)");
    }

    #[test]
    fn backend_default_is_builtin() {
        assert_eq!(AdbBackend::default(), AdbBackend::Builtin);
    }

    #[test]
    fn root_is_requested_through_adb_binary() {
        let serial = DeviceSerial::new("R58M123ABC").expect("valid serial");
        assert_eq!(
            process::describe(&ACommand::root_command(&serial)),
            "adb -s R58M123ABC root"
        );
    }
}
