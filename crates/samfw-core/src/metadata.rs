//! Latest-firmware lookup against Samsung's FOTA version metadata.
//!
//! The service publishes one small XML document per (CSC, model):
//!
//! ```txt
//! <versioninfo>
//!   <firmware>
//!     <model>SM-A205W</model>
//!     <cc>XAC</cc>
//!     <version>
//!       <latest o="11">A205WVLS9CWD1/A205WOYA9CWD1/A205WVLS9CWD1/A205WVLS9CWD1</latest>
//!       ...
//! ```
//!
//! The first `/`-separated field of `latest` is the build (PDA) version.

use std::fmt;
use std::time::Duration;

use log::{error, info};

use crate::error::{MetadataError, Result};
use crate::identity::{Csc, Model};
use crate::utils::is_all_alnum_or;

pub const DEFAULT_BASE_URL: &str = "https://fota-cloud-dn.ospserver.net/firmware";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Firmware build string, e.g. `A205WVLS9CWD1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FirmwareVersion(Box<str>);

impl FirmwareVersion {
    #[must_use]
    pub fn new(version: &str) -> Option<Self> {
        if !version.is_empty() && is_all_alnum_or(version.as_bytes(), b"") {
            Some(Self(version.into()))
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything able to name the newest firmware for a device.
pub trait VersionSource {
    fn fetch_latest_version(&self, csc: &Csc, model: &Model) -> Result<FirmwareVersion>;
}

fn child<'a, 'i>(node: roxmltree::Node<'a, 'i>, tag: &str) -> Option<roxmltree::Node<'a, 'i>> {
    node.children().find(|n| n.has_tag_name(tag))
}

/// Extract the version from a `version.xml` document.
///
/// `firmware` may be the root element or sit below it.
pub fn parse_latest_version(xml: &str) -> Result<FirmwareVersion, MetadataError> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| MetadataError::Xml(e.to_string()))?;
    let latest = doc
        .descendants()
        .filter(|n| n.has_tag_name("firmware"))
        .find_map(|fw| child(fw, "version").and_then(|v| child(v, "latest")))
        .ok_or(MetadataError::MissingElement)?;

    let text = latest.text().unwrap_or_default();
    let first = text.split('/').next().unwrap_or_default().trim();
    FirmwareVersion::new(first).ok_or_else(|| MetadataError::BadVersion(text.to_string()))
}

/// HTTP client for the FOTA metadata endpoint.
#[derive(Debug, Clone)]
pub struct FotaClient {
    agent: ureq::Agent,
    base_url: String,
}

impl FotaClient {
    #[must_use]
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(timeout)
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn version_url(&self, csc: &Csc, model: &Model) -> String {
        format!("{}/{csc}/{model}/version.xml", self.base_url)
    }

    fn fetch_xml(&self, url: &str) -> Result<String, MetadataError> {
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => MetadataError::Status(code),
                other => MetadataError::Network(other.to_string()),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status(status.as_u16()));
        }

        response
            .body_mut()
            .read_to_string()
            .map_err(|e| MetadataError::Network(e.to_string()))
    }
}

impl VersionSource for FotaClient {
    fn fetch_latest_version(&self, csc: &Csc, model: &Model) -> Result<FirmwareVersion> {
        let url = self.version_url(csc, model);
        info!("Fetching firmware information from: {url}");

        let version = self
            .fetch_xml(&url)
            .and_then(|xml| parse_latest_version(&xml))
            .inspect_err(|e| error!("Error fetching firmware information: {e}"))?;
        info!("Latest firmware for {model}/{csc}: {version}");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    const VERSION_XML: &str = "<versioninfo><firmware><version>\
        <latest o=\"11\">A205WVLS9CWD1/A205WOYA9CWD1/A205WVLS9CWD1</latest>\
        </version></firmware></versioninfo>";

    /// Accept one connection on localhost, read the request head, then send
    /// `response` (or just hang up when it is `None`). Yields the request head.
    fn serve_once(response: Option<String>) -> (FotaClient, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/firmware", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut buf = [0; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            if let Some(response) = response {
                stream.write_all(response.as_bytes()).unwrap();
            }
            String::from_utf8_lossy(&head).into_owned()
        });
        (FotaClient::new(&base, Some(Duration::from_secs(5))), handle)
    }

    fn http(status: &str, body: &str) -> Option<String> {
        Some(format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ))
    }

    fn a205w() -> (Csc, Model) {
        (Csc::new("XAC").unwrap(), Model::new("SM-A205W").unwrap())
    }

    #[test]
    fn latest_from_bare_firmware_root() {
        let xml = "<firmware><version><latest>A205WXAC1ATA1/XAC/A205WXAC1ATA1</latest></version></firmware>";
        assert_eq!(parse_latest_version(xml).unwrap().as_str(), "A205WXAC1ATA1");
    }

    #[test]
    fn latest_from_real_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<versioninfo>
  <url>http://fota-cloud-dn.ospserver.net:80/firmware/</url>
  <firmware>
    <model>SM-A205W</model>
    <cc>XAC</cc>
    <version>
      <latest o="11">A205WVLS9CWD1/A205WOYA9CWD1/A205WVLS9CWD1/A205WVLS9CWD1</latest>
      <upgrade>
        <value rcount="1" fwsize="1234">A205WVLS8CVK2/A205WOYA8CVK2/A205WVLS8CVK2/A205WVLS8CVK2</value>
      </upgrade>
    </version>
  </firmware>
</versioninfo>"#;
        assert_eq!(parse_latest_version(xml).unwrap().as_str(), "A205WVLS9CWD1");
    }

    #[test]
    fn missing_latest_is_an_error() {
        let xml = "<versioninfo><firmware><version><upgrade/></version></firmware></versioninfo>";
        assert!(matches!(
            parse_latest_version(xml),
            Err(MetadataError::MissingElement)
        ));
        assert!(matches!(
            parse_latest_version("<versioninfo/>"),
            Err(MetadataError::MissingElement)
        ));
    }

    #[test]
    fn empty_latest_is_not_defaulted() {
        let xml = "<firmware><version><latest></latest></version></firmware>";
        assert!(matches!(
            parse_latest_version(xml),
            Err(MetadataError::BadVersion(_))
        ));
        let xml = "<firmware><version><latest>/XAC/X</latest></version></firmware>";
        assert!(parse_latest_version(xml).is_err());
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(matches!(
            parse_latest_version("<firmware><version>"),
            Err(MetadataError::Xml(_))
        ));
        assert!(matches!(
            parse_latest_version("Error 404"),
            Err(MetadataError::Xml(_))
        ));
    }

    #[test]
    fn url_is_built_from_base() {
        let client = FotaClient::new(
            "https://example.invalid/firmware/",
            Some(Duration::from_secs(1)),
        );
        let csc = Csc::new("XAC").unwrap();
        let model = Model::new("SM-A205W").unwrap();
        assert_eq!(
            client.version_url(&csc, &model),
            "https://example.invalid/firmware/XAC/SM-A205W/version.xml"
        );
    }

    #[test]
    fn fetches_latest_version_over_http() {
        let (client, server) = serve_once(http("200 OK", VERSION_XML));
        let (csc, model) = a205w();

        let version = client.fetch_latest_version(&csc, &model).unwrap();
        assert_eq!(version.as_str(), "A205WVLS9CWD1");
        let head = server.join().unwrap();
        assert!(head.starts_with("GET /firmware/XAC/SM-A205W/version.xml HTTP/1.1"));
        assert!(head.contains(USER_AGENT));
    }

    #[test]
    fn http_error_status_is_reported() {
        let (client, server) = serve_once(http("404 Not Found", "Not Found"));
        let (csc, model) = a205w();

        let res = client.fetch_latest_version(&csc, &model);
        server.join().unwrap();
        assert!(matches!(
            res,
            Err(Error::Metadata(MetadataError::Status(404)))
        ));
    }

    #[test]
    fn dropped_connection_is_a_network_error() {
        let (client, server) = serve_once(None);
        let (csc, model) = a205w();

        let res = client.fetch_latest_version(&csc, &model);
        server.join().unwrap();
        assert!(matches!(
            res,
            Err(Error::Metadata(MetadataError::Network(_)))
        ));
    }
}
