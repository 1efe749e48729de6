//! Image store error types.

use thiserror::Error;

/// Result type for image store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors produced by blob storage, the codec and the store itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Expected variant is absent. Treated as a cache miss, never as a load failure.
    #[error("Image not found: {0}")]
    NotFound(String),
    /// Failed to decode image bytes.
    #[error("Decode error: {0}")]
    Decode(String),
    /// Failed to re-encode a rendition.
    #[error("Encode error: {0}")]
    Encode(String),
    /// Durable storage read or write failed.
    #[error("IO error: {0}")]
    Io(String),
    /// Configuration was changed after load or save traffic started.
    #[error("configuration cannot change once load or save traffic has started")]
    ConfigurationLocked,
    /// No async runtime or worker failure.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl StoreError {
    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Returns whether the error only signals a missing variant.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns whether the error came from durable storage.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
