use std::path::Path;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use samfw_core::adb::DeviceSerial;
use samfw_core::identity::DeviceIdentity;
use samfw_core::metadata::FirmwareVersion;
use samfw_core::pipeline::{Frontend, Stage};

use crate::output;

/// Interactive terminal front-end: numbered device menu and progress lines.
pub struct Console {
    /// Serial given on the command line; skips the menu.
    preset: Option<String>,
}

impl Console {
    pub const fn new(preset: Option<String>) -> Self {
        Self { preset }
    }

    fn prompt() -> Option<String> {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                output::failure(format_args!("cannot read from terminal: {e}"));
                return None;
            }
        };
        match rl.readline("Select a device (number): ") {
            Ok(line) => Some(line),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => None,
            Err(e) => {
                output::failure(e);
                None
            }
        }
    }
}

/// 1-based menu choice to 0-based index.
pub fn parse_choice(input: &str, count: usize) -> Option<usize> {
    let n: usize = input.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

impl Frontend for Console {
    fn select_device(&mut self, devices: &[DeviceSerial]) -> Option<usize> {
        if let Some(ref wanted) = self.preset {
            let found = devices.iter().position(|d| d.as_str() == wanted);
            if found.is_none() {
                output::failure(format_args!("device {wanted} is not attached or not ready"));
            }
            return found;
        }

        output::line("Connected devices:");
        for (i, device) in devices.iter().enumerate() {
            output::line(format_args!("{}. {device}", i + 1));
        }
        let choice = parse_choice(&Self::prompt()?, devices.len());
        if choice.is_none() {
            output::failure("invalid choice, enter one of the numbers above");
        }
        choice
    }

    fn stage_started(&mut self, stage: Stage) {
        match stage {
            Stage::ListDevices => output::step("Looking for devices..."),
            Stage::ResolveIdentity => output::step("Reading device identity..."),
            Stage::ResolveVersion => output::step("Searching for the latest firmware version..."),
            Stage::Acquire => output::step("Downloading firmware..."),
            Stage::Extract => output::step("Extracting firmware..."),
            Stage::SelectDevice => {}
        }
    }

    fn device_selected(&mut self, device: &DeviceSerial) {
        output::field("Selected device", device);
    }

    fn identity_resolved(&mut self, identity: &DeviceIdentity) {
        output::field("CSC Code", &identity.csc);
        output::field("Device Model", &identity.model);
        output::field("IMEI", output::mask_imei(identity.imei.as_str()));
    }

    fn version_resolved(&mut self, version: &FirmwareVersion) {
        output::field("Latest Firmware Build", version);
    }

    fn archive_ready(&mut self, archive: &Path) {
        output::field("Archive", archive.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_choices() {
        assert_eq!(parse_choice("1", 2), Some(0));
        assert_eq!(parse_choice(" 2\n", 2), Some(1));
        assert_eq!(parse_choice("0", 2), None);
        assert_eq!(parse_choice("3", 2), None);
        assert_eq!(parse_choice("-1", 2), None);
        assert_eq!(parse_choice("two", 2), None);
        assert_eq!(parse_choice("", 2), None);
    }

    #[test]
    fn preset_device_skips_menu() {
        let devices = [
            DeviceSerial::new("abc123").unwrap(),
            DeviceSerial::new("R58M123ABC").unwrap(),
        ];
        let mut console = Console::new(Some("R58M123ABC".into()));
        assert_eq!(console.select_device(&devices), Some(1));

        let mut console = Console::new(Some("gone".into()));
        assert_eq!(console.select_device(&devices), None);
    }
}
