//! Store configuration.

pub mod settings_loader;
pub mod store_config;

pub use settings_loader::{ConfigError, SettingsLoader};
pub use store_config::{DEFAULT_JPEG_QUALITY, IoErrorHandler, LogLevel, StoreConfig, StoreSettings};
