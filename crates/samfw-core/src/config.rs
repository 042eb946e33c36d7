//! User configuration, stored as TOML in the platform config dir
//! (e.g. `~/.config/samfw/config.toml`).
//!
//! A missing file is created with the defaults, so users have something to edit.
//! Missing keys fall back to their defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::acquire::ExternalDownloader;
use crate::adb::AdbBackend;
use crate::error::{Error, Result};
use crate::extract::SystemTools;
use crate::metadata::DEFAULT_BASE_URL;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub backend: AdbBackend,
    /// `firmware/<model>/` trees are created below this directory.
    pub work_root: PathBuf,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            backend: AdbBackend::default(),
            work_root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// `<base_url>/<csc>/<model>/version.xml` is fetched.
    pub base_url: String,
    /// Seconds per request; `0` waits forever.
    pub timeout_secs: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            timeout_secs: 30,
        }
    }
}

impl MetadataSettings {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralSettings,
    pub metadata: MetadataSettings,
    pub downloader: ExternalDownloader,
    pub tools: SystemTools,
}

impl Config {
    /// `<config dir>/samfw/config.toml`, if the platform has a config dir.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("samfw").join(CONFIG_FILE))
    }

    /// Read `path`, or write the defaults there if it doesn't exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        let config_err = |reason: String| Error::Config {
            path: path.to_path_buf(),
            reason,
        };

        match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).map_err(|e| config_err(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("Cannot write default config to {}: {e}", path.display());
                } else {
                    info!("Wrote default config to {}", path.display());
                }
                Ok(config)
            }
            Err(e) => Err(config_err(e.to_string())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("samfw").join(CONFIG_FILE);

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.is_file());
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "[general]\nbackend = \"system\"\n\n[tools]\nsevenzip = \"7zz\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.general.backend, AdbBackend::System);
        assert_eq!(config.general.work_root, PathBuf::from("."));
        assert_eq!(config.tools.sevenzip, "7zz");
        assert_eq!(config.tools.lz4, "lz4");
        assert_eq!(config.metadata.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.downloader.program, "samloader");
    }

    #[test]
    fn garbage_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(&path, "[general\nbackend = 3").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config { .. })));
    }

    #[test]
    fn zero_http_timeout_means_none() {
        let mut metadata = MetadataSettings::default();
        assert_eq!(metadata.timeout(), Some(Duration::from_secs(30)));
        metadata.timeout_secs = 0;
        assert_eq!(metadata.timeout(), None);
    }
}
