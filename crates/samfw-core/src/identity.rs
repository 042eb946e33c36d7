//! Who is this device? Region (CSC), model and IMEI, read over ADB.
//!
//! The raw readers are split from their parsers so the parsing can be tested
//! against captured output.

use std::fmt;

use log::{error, info, warn};

use crate::adb::{DeviceBridge, DeviceSerial};
use crate::error::{Error, IdentityField, Result};
use crate::utils::{is_all_alnum_or, last_quoted};

/// File holding the active CSC on Samsung devices. Readable as root only on most builds.
pub const CSC_PATH: &str = "/efs/imei/omcnw_code.dat";
pub const MODEL_PROP: &str = "ro.product.model";
/// `service call iphonesubinfo 1` answers `getDeviceId()` as a UTF-16 parcel.
const IMEI_SERVICE_CALL: [&str; 4] = ["service", "call", "iphonesubinfo", "1"];
const IMEI_LEN: usize = 15;

/// Vendor prefixes dropped by [`Model::bare`].
pub const MODEL_PREFIXES: [&str; 2] = ["SM-", "GT-"];

/// Regional code (CSC), e.g. `XAC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Csc(Box<str>);

impl Csc {
    #[must_use]
    pub fn new(code: &str) -> Option<Self> {
        let code = code.trim();
        if (2..=5).contains(&code.len()) && is_all_alnum_or(code.as_bytes(), b"") {
            Some(Self(code.into()))
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hardware model string, e.g. `SM-A205W`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Model(Box<str>);

impl Model {
    #[must_use]
    pub fn new(model: &str) -> Option<Self> {
        let model = model.trim();
        if !model.is_empty() && is_all_alnum_or(model.as_bytes(), b"-_") {
            Some(Self(model.into()))
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Model without its vendor prefix (`SM-A205W` -> `A205W`).
    /// Firmware sub-archives are named after this form.
    #[must_use]
    pub fn bare(&self) -> &str {
        bare_model(&self.0)
    }
}

/// Strip at most one of [`MODEL_PREFIXES`]. Anything else is returned unchanged.
#[must_use]
pub fn bare_model(model: &str) -> &str {
    MODEL_PREFIXES
        .iter()
        .find_map(|p| model.strip_prefix(p))
        .unwrap_or(model)
}

/// 15-digit hardware identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Imei(Box<str>);

impl Imei {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_display {
    ($($t:ty),*) => {$(
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    )*};
}
impl_display!(Csc, Model, Imei);

/// Everything needed to pick a firmware for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub csc: Csc,
    pub model: Model,
    pub imei: Imei,
}

/// Serials of the devices that are ready for use, in ADB's order.
/// Unauthorized and offline devices are left out.
#[must_use]
pub fn ready_devices(table: Vec<(String, String)>) -> Vec<DeviceSerial> {
    table
        .into_iter()
        .filter(|(_, status)| status == "device")
        .filter_map(|(serial, _)| {
            let parsed = DeviceSerial::new(&serial);
            if parsed.is_none() {
                warn!("Ignoring device with unusable serial {serial:?}");
            }
            parsed
        })
        .collect()
}

/// Parse the raw text of `adb devices`, header included.
#[must_use]
pub fn parse_device_table(output: &str) -> Vec<DeviceSerial> {
    ready_devices(
        output
            .lines()
            .skip(1) // header
            .filter_map(|line| {
                let mut cols = line.split_whitespace();
                Some((cols.next()?.to_string(), cols.next()?.to_string()))
            })
            .collect(),
    )
}

/// Attached devices ready for use. Any bridge failure yields an empty list.
pub fn list_devices(bridge: &impl DeviceBridge) -> Vec<DeviceSerial> {
    match bridge.devices() {
        Ok(table) => ready_devices(table),
        Err(e) => {
            error!("Cannot list devices: {e}");
            Vec::new()
        }
    }
}

pub fn get_regional_code(bridge: &impl DeviceBridge, device: &DeviceSerial) -> Result<Csc> {
    // Many devices refuse (or don't need) this; the read below is what counts.
    match bridge.root(device) {
        Ok(out) => info!("adb root: {out}"),
        Err(e) => warn!("adb root failed, reading CSC unprivileged: {e}"),
    }

    let out = bridge
        .shell(device, &["cat", CSC_PATH])
        .map_err(|e| Error::identity(IdentityField::RegionalCode, e))?;
    if out.trim().is_empty() {
        return Err(Error::identity(
            IdentityField::RegionalCode,
            format!("{CSC_PATH} is empty"),
        ));
    }
    Csc::new(&out).ok_or_else(|| {
        Error::identity(
            IdentityField::RegionalCode,
            format!("unexpected content {:?}", out.trim()),
        )
    })
}

/// Decode the parcel dump printed by `service call iphonesubinfo 1`:
///
/// ```txt
/// Result: Parcel(
///   0x00000000: 00000000 0000000f 00350033 00380035 '........3.5.8.5.'
///   0x00000010: 00350038 00340030 00310030 00300035 '8.5.0.4.0.1.5.0.'
///   0x00000020: 00390032 00000034                   '2.9.4...        ')
/// ```
///
/// Only the quoted ASCII column of each line is used.
pub fn decode_imei(output: &str) -> Result<Imei> {
    let digits: String = output
        .lines()
        .filter_map(last_quoted)
        .flat_map(str::chars)
        .filter(char::is_ascii_digit)
        .collect();

    if digits.len() == IMEI_LEN {
        Ok(Imei(digits.into()))
    } else {
        Err(Error::identity(
            IdentityField::Imei,
            format!("expected {IMEI_LEN} digits, decoded {}", digits.len()),
        ))
    }
}

pub fn get_hardware_identifier(bridge: &impl DeviceBridge, device: &DeviceSerial) -> Result<Imei> {
    let out = bridge
        .shell(device, &IMEI_SERVICE_CALL)
        .map_err(|e| Error::identity(IdentityField::Imei, e))?;
    decode_imei(&out)
}

pub fn get_model(bridge: &impl DeviceBridge, device: &DeviceSerial) -> Result<Model> {
    let out = bridge
        .shell(device, &["getprop", MODEL_PROP])
        .map_err(|e| Error::identity(IdentityField::Model, e))?;
    if out.trim().is_empty() {
        return Err(Error::identity(
            IdentityField::Model,
            format!("{MODEL_PROP} is empty"),
        ));
    }
    Model::new(&out).ok_or_else(|| {
        Error::identity(
            IdentityField::Model,
            format!("unexpected value {:?}", out.trim()),
        )
    })
}

/// Region, then model, then IMEI. The first failure is returned.
pub fn resolve(bridge: &impl DeviceBridge, device: &DeviceSerial) -> Result<DeviceIdentity> {
    let csc = get_regional_code(bridge, device)?;
    info!("CSC of {device}: {csc}");
    let model = get_model(bridge, device)?;
    info!("Model of {device}: {model}");
    let imei = get_hardware_identifier(bridge, device)?;
    info!("IMEI of {device} decoded");
    Ok(DeviceIdentity { csc, model, imei })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    pub(crate) const PARCEL_OK: &str = "Result: Parcel(\n\
        \x20 0x00000000: 00000000 0000000f 00350033 00380035 '........3.5.8.5.'\n\
        \x20 0x00000010: 00350038 00340030 00310030 00300035 '8.5.0.4.0.1.5.0.'\n\
        \x20 0x00000020: 00390032 00000034                   '2.9.4...        ')";

    /// Scripted bridge: answers by first shell argument, records calls.
    #[derive(Default)]
    pub(crate) struct FakeBridge {
        pub table: Option<Vec<(String, String)>>,
        pub csc: Option<String>,
        pub model: Option<String>,
        pub parcel: Option<String>,
        pub root_ok: bool,
        pub calls: RefCell<Vec<String>>,
    }

    impl FakeBridge {
        pub(crate) fn a205w() -> Self {
            Self {
                table: Some(vec![("R58M123ABC".into(), "device".into())]),
                csc: Some("XAC\n".into()),
                model: Some("SM-A205W".into()),
                parcel: Some(PARCEL_OK.into()),
                root_ok: false,
                calls: RefCell::default(),
            }
        }
    }

    impl DeviceBridge for FakeBridge {
        fn devices(&self) -> Result<Vec<(String, String)>, String> {
            self.calls.borrow_mut().push("devices".into());
            self.table.clone().ok_or_else(|| "daemon not running".into())
        }

        fn shell(&self, _: &DeviceSerial, args: &[&str]) -> Result<String, String> {
            self.calls.borrow_mut().push(args.join(" "));
            let answer = match args.first().copied() {
                Some("cat") => self.csc.clone(),
                Some("getprop") => self.model.clone(),
                Some("service") => self.parcel.clone(),
                _ => None,
            };
            answer.ok_or_else(|| "Permission denied".into())
        }

        fn root(&self, _: &DeviceSerial) -> Result<String, String> {
            self.calls.borrow_mut().push("root".into());
            if self.root_ok {
                Ok("restarting adbd as root".into())
            } else {
                Err("adbd cannot run as root in production builds".into())
            }
        }
    }

    fn serial() -> DeviceSerial {
        DeviceSerial::new("R58M123ABC").unwrap()
    }

    #[test]
    fn device_table_keeps_ready_devices_in_order() {
        let out = "List of devices attached\nabc123\tdevice\ndef456\toffline\n\
                   ghi789\tunauthorized\njkl012\tdevice\n\n";
        let serials: Vec<_> = parse_device_table(out).iter().map(ToString::to_string).collect();
        assert_eq!(serials, ["abc123", "jkl012"]);
    }

    #[test]
    fn device_table_example() {
        let out = ["List of devices attached", "abc123\tdevice", "def456\toffline"].join("\n");
        let serials: Vec<_> = parse_device_table(&out).iter().map(ToString::to_string).collect();
        assert_eq!(serials, ["abc123"]);
    }

    #[test]
    fn device_table_header_is_never_a_device() {
        assert!(parse_device_table("List of devices attached\n").is_empty());
        assert!(parse_device_table("").is_empty());
    }

    #[test]
    fn list_devices_fails_soft() {
        let bridge = FakeBridge::default();
        assert!(list_devices(&bridge).is_empty());
    }

    #[test]
    fn imei_from_parcel() {
        assert_eq!(decode_imei(PARCEL_OK).unwrap().as_str(), "358585040150294");
    }

    #[test]
    fn imei_from_two_segments() {
        let out = "0x0: '3.5.8.5.8.5.0.4.'\n0x1: '0.1.5.0.2.9.4...'";
        assert_eq!(decode_imei(out).unwrap().as_str(), "358585040150294");
    }

    #[test]
    fn imei_wrong_length_is_rejected() {
        // 14 digits
        assert!(decode_imei("'3.5.8.5.8.5.0.4.'\n'0.1.5.0.2.9...'").is_err());
        // 16 digits
        assert!(decode_imei("'3.5.8.5.8.5.0.4.'\n'0.1.5.0.2.9.4.7'").is_err());
        assert!(decode_imei("").is_err());
        assert!(decode_imei("Result: Parcel(00000000 ffffffea '....')").is_err());
    }

    #[test]
    fn hex_column_is_ignored() {
        // digits outside the quotes must not leak in
        let out = "0x00000000: 00000000 0000000f '3.5.8.5.8.5.0.4.0.1.5.0.2.9.4.'";
        assert_eq!(decode_imei(out).unwrap().as_str(), "358585040150294");
    }

    #[test]
    fn bare_model_strips_known_prefixes() {
        assert_eq!(bare_model("SM-A205W"), "A205W");
        assert_eq!(bare_model("GT-I9300"), "I9300");
        assert_eq!(bare_model("Pixel-7"), "Pixel-7");
        assert_eq!(bare_model("SMA205W"), "SMA205W");
    }

    #[test]
    fn bare_model_is_idempotent() {
        for m in ["SM-A205W", "GT-I9300", "A205W", "XY-Z"] {
            assert_eq!(bare_model(bare_model(m)), bare_model(m));
        }
        let model = Model::new("SM-A205W").unwrap();
        assert_eq!(model.bare(), "A205W");
        assert_eq!(model.as_str(), "SM-A205W");
    }

    #[test]
    fn csc_survives_failed_root() {
        let bridge = FakeBridge::a205w();
        assert_eq!(get_regional_code(&bridge, &serial()).unwrap().as_str(), "XAC");
        assert_eq!(bridge.calls.borrow()[0], "root");
    }

    #[test]
    fn empty_csc_is_an_error() {
        let bridge = FakeBridge {
            csc: Some("  \n".into()),
            ..FakeBridge::a205w()
        };
        assert!(matches!(
            get_regional_code(&bridge, &serial()),
            Err(Error::Identity {
                what: IdentityField::RegionalCode,
                ..
            })
        ));
    }

    #[test]
    fn model_rejects_shell_metacharacters() {
        let bridge = FakeBridge {
            model: Some("SM-A205W;reboot".into()),
            ..FakeBridge::a205w()
        };
        assert!(get_model(&bridge, &serial()).is_err());
    }

    #[test]
    fn resolve_reports_failing_field() {
        let bridge = FakeBridge {
            parcel: None,
            ..FakeBridge::a205w()
        };
        assert!(matches!(
            resolve(&bridge, &serial()),
            Err(Error::Identity {
                what: IdentityField::Imei,
                ..
            })
        ));

        let id = resolve(&FakeBridge::a205w(), &serial()).unwrap();
        assert_eq!(id.model.as_str(), "SM-A205W");
        assert_eq!(id.imei.as_str(), "358585040150294");
    }
}
