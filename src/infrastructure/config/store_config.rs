//! Image store configuration.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::errors::StoreError;
use crate::infrastructure::image::memory_cache::DEFAULT_CACHE_CAPACITY;

/// Default JPEG quality for derived renditions.
pub const DEFAULT_JPEG_QUALITY: u8 = 65;

/// Handler for failures in background work (thumbnails, write-through, preload).
pub type IoErrorHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Serialisable store settings, read from `imagestore.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Thumbnail max dimension. 0 disables thumbnails.
    #[serde(default)]
    pub thumbnail_size: u32,

    /// Renditions persisted to the cache tier.
    #[serde(default)]
    pub cached_sizes: BTreeSet<u32>,

    /// JPEG quality (1-100) for derived renditions.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Maximum decoded renditions held in memory.
    #[serde(default = "default_memory_cache_capacity")]
    pub memory_cache_capacity: usize,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            thumbnail_size: 0,
            cached_sizes: BTreeSet::new(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            memory_cache_capacity: DEFAULT_CACHE_CAPACITY,
            log_level: LogLevel::default(),
        }
    }
}

const fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

const fn default_memory_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

/// Construction-time configuration of an `ImageStore`. Immutable once the store exists.
#[derive(Clone)]
pub struct StoreConfig {
    thumbnail_size: u32,
    cached_sizes: BTreeSet<u32>,
    jpeg_quality: u8,
    memory_cache_capacity: usize,
    io_error_handler: Option<IoErrorHandler>,
}

impl StoreConfig {
    /// Creates a configuration with defaults: no thumbnails, no cached sizes.
    #[must_use]
    pub fn new() -> Self {
        Self::from_settings(&StoreSettings::default())
    }

    /// Creates a configuration from file settings.
    #[must_use]
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            thumbnail_size: settings.thumbnail_size,
            cached_sizes: settings
                .cached_sizes
                .iter()
                .copied()
                .filter(|&n| n > 0)
                .collect(),
            jpeg_quality: settings.jpeg_quality.clamp(1, 100),
            memory_cache_capacity: settings.memory_cache_capacity,
            io_error_handler: None,
        }
    }

    /// Sets the thumbnail dimension. 0 disables thumbnails.
    #[must_use]
    pub const fn with_thumbnail_size(mut self, size: u32) -> Self {
        self.thumbnail_size = size;
        self
    }

    /// Adds a size to persist in the cache tier. 0 is ignored.
    #[must_use]
    pub fn with_cached_size(mut self, size: u32) -> Self {
        self.insert_cached_size(size);
        self
    }

    /// Sets the JPEG quality, clamped to 1..=100.
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Sets the memory cache capacity in renditions.
    #[must_use]
    pub const fn with_memory_cache_capacity(mut self, capacity: usize) -> Self {
        self.memory_cache_capacity = capacity;
        self
    }

    /// Sets the store-wide handler for background failures.
    #[must_use]
    pub fn with_io_error_handler(
        mut self,
        handler: impl Fn(&StoreError) + Send + Sync + 'static,
    ) -> Self {
        self.io_error_handler = Some(Arc::new(handler));
        self
    }

    pub(crate) fn insert_cached_size(&mut self, size: u32) -> bool {
        size > 0 && self.cached_sizes.insert(size)
    }

    /// Thumbnail dimension, if thumbnails are enabled.
    #[must_use]
    pub const fn thumbnail_size(&self) -> Option<u32> {
        if self.thumbnail_size == 0 {
            None
        } else {
            Some(self.thumbnail_size)
        }
    }

    /// Sizes persisted in the cache tier.
    #[must_use]
    pub const fn cached_sizes(&self) -> &BTreeSet<u32> {
        &self.cached_sizes
    }

    /// Returns true if renditions of `size` are persisted.
    #[must_use]
    pub fn is_cached_size(&self, size: u32) -> bool {
        self.cached_sizes.contains(&size)
    }

    /// JPEG quality for derived renditions.
    #[must_use]
    pub const fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Memory cache capacity in renditions.
    #[must_use]
    pub const fn memory_cache_capacity(&self) -> usize {
        self.memory_cache_capacity
    }

    /// Reports a background failure to the configured handler.
    pub fn report_io_error(&self, error: &StoreError) {
        tracing::warn!(error = %error, "Background image work failed");
        if let Some(handler) = &self.io_error_handler {
            handler(error);
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("thumbnail_size", &self.thumbnail_size)
            .field("cached_sizes", &self.cached_sizes)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("memory_cache_capacity", &self.memory_cache_capacity)
            .field("has_io_error_handler", &self.io_error_handler.is_some())
            .finish()
    }
}
