//! Global sitepack configuration.
//!
//! Defaults for packaging and installing, stored as TOML under the user's
//! configuration directory. A missing file means defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sitepack_pack::format::DEFAULT_MIN_TEMPLATE_SIZE;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name for config and data directories.
const APP_NAME: &str = "sitepack";

/// Config file name inside the config directory.
const CONFIG_FILE: &str = "config.toml";

/// Global sitepack configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SitepackConfig {
    /// Configuration format version.
    pub version: u8,

    /// Template executable used by `sitepack pack` when none is given.
    pub default_template: Option<PathBuf>,

    /// Templates smaller than this produce a packaging warning.
    pub min_template_size: u64,

    /// Parent directory for installations without an explicit target.
    pub install_root: PathBuf,

    /// Port for new sites.
    pub default_port: u16,

    /// Application pool name for new sites.
    pub default_pool: String,

    /// How long to wait for a site to stop (humantime, e.g. "30s").
    pub stop_timeout: String,

    /// Override for the data directory (manifests, program list, sites).
    pub data_dir: Option<PathBuf>,
}

impl Default for SitepackConfig {
    fn default() -> Self {
        Self {
            version: 1,
            default_template: None,
            min_template_size: DEFAULT_MIN_TEMPLATE_SIZE,
            install_root: default_install_root(),
            default_port: 80,
            default_pool: APP_NAME.to_string(),
            stop_timeout: "30s".to_string(),
            data_dir: None,
        }
    }
}

#[cfg(windows)]
fn default_install_root() -> PathBuf {
    PathBuf::from(r"C:\inetpub\sitepack")
}

#[cfg(not(windows))]
fn default_install_root() -> PathBuf {
    PathBuf::from("/srv/sitepack")
}

impl SitepackConfig {
    /// Path of the config file.
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::ConfigLoad("could not determine config directory".into()))?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::ConfigLoad(format!("{}: {}", path.display(), e))),
        };
        toml::from_str(&text).map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path().map_err(|e| Error::ConfigSave(e.to_string()))?)
    }

    /// Save configuration to a file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::ConfigSave(e.to_string()))?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::ConfigSave(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| Error::ConfigSave(e.to_string()))
    }

    /// Directory holding manifests, the program list and the site table.
    ///
    /// On Linux: `~/.local/share/sitepack`
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .ok_or_else(|| Error::ConfigLoad("could not determine data directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Parsed stop timeout.
    pub fn stop_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.stop_timeout)
            .map_err(|e| Error::ConfigLoad(format!("stop_timeout '{}': {}", self.stop_timeout, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SitepackConfig::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.min_template_size, 10 * 1024 * 1024);
        assert_eq!(config.default_port, 80);
        assert_eq!(config.stop_timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = SitepackConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, SitepackConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = SitepackConfig {
            default_port: 8080,
            default_pool: "shop-pool".to_string(),
            data_dir: Some(dir.path().join("data")),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = SitepackConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.data_dir().unwrap(), dir.path().join("data"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_port = 5000\nstop_timeout = \"2m\"\n").unwrap();

        let config = SitepackConfig::load_from(&path).unwrap();
        assert_eq!(config.default_port, 5000);
        assert_eq!(config.stop_timeout().unwrap(), Duration::from_secs(120));
        assert_eq!(config.default_pool, "sitepack");
    }

    #[test]
    fn test_invalid_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_port = \"eighty\"").unwrap();
        assert!(matches!(
            SitepackConfig::load_from(&path),
            Err(Error::ConfigLoad(_))
        ));
    }

    #[test]
    fn test_bad_stop_timeout() {
        let config = SitepackConfig {
            stop_timeout: "soon".to_string(),
            ..Default::default()
        };
        assert!(config.stop_timeout().is_err());
    }
}
