//! Settings file loading.

use super::store_config::StoreSettings;
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";
const APP_NAME: &str = "imagestore";
const SETTINGS_FILE_NAME: &str = "imagestore.toml";

/// Errors from reading or writing the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home directory to derive the config directory from.
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Settings could not be serialized.
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    /// Settings file is not valid TOML.
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Reads and writes `imagestore.toml`.
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_dir: PathBuf,
}

impl SettingsLoader {
    /// Create a new `SettingsLoader` in the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration directory cannot be determined.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::ConfigDirNotFound)?;

        Ok(Self { config_dir })
    }

    /// Creates a new `SettingsLoader` with a specific directory (useful for testing).
    #[must_use]
    pub fn with_dir(path: PathBuf) -> Self {
        Self { config_dir: path }
    }

    /// Returns the configuration directory path.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns the settings file path.
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE_NAME)
    }

    /// Loads the store settings, writing a default file if none exists.
    ///
    /// A file that fails to parse is logged and replaced by defaults in memory only.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or the default cannot be written.
    pub fn load(&self) -> Result<StoreSettings, ConfigError> {
        let path = self.settings_path();

        if !path.exists() {
            info!("Settings file not found at {:?}, creating default.", path);
            let defaults = StoreSettings::default();
            self.save(&defaults)?;
            return Ok(defaults);
        }

        let content = fs::read_to_string(&path)?;
        match toml::from_str::<StoreSettings>(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Failed to parse settings file: {}. Using defaults.", e);
                Ok(StoreSettings::default())
            }
        }
    }

    /// Writes the settings file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if serialization or the write fails.
    pub fn save(&self, settings: &StoreSettings) -> Result<(), ConfigError> {
        if !self.config_dir.exists() {
            info!("Creating configuration directory at {:?}", self.config_dir);
            fs::create_dir_all(&self.config_dir)?;
        }
        let content = toml::to_string_pretty(settings)?;
        let mut file = fs::File::create(self.settings_path())?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}
