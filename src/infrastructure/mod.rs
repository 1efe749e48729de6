//! Infrastructure layer with storage, codec, and configuration adapters.

/// Store configuration and settings files.
pub mod config;
/// Image decoding and in-memory caching.
pub mod image;
/// Tracing subscriber setup.
pub mod logging;
/// Blob storage adapters.
pub mod storage;

pub use config::{LogLevel, SettingsLoader, StoreConfig, StoreSettings};
pub use image::{CacheStats, ImageCrateCodec, MemoryImageCache};
pub use logging::init_logging;
pub use storage::{FileBlobStore, MemoryBlobStore};
