//! Port definition for durable blob storage.

use bytes::Bytes;

use crate::domain::entities::{ImageId, Variant};
use crate::domain::errors::StoreResult;

/// Port for durable storage of image bytes addressed by identifier and variant.
///
/// Implementations must allow concurrent reads and concurrent writes to
/// distinct keys. Calls may block and are only made from the worker pool,
/// except `exists`, which must be cheap.
#[cfg_attr(test, mockall::automock)]
pub trait BlobStorePort: Send + Sync {
    /// Returns true if the variant is persisted.
    fn exists(&self, id: &ImageId, variant: Variant) -> bool;

    /// Reads a persisted variant.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if absent, `StoreError::Io` on read failure.
    fn read(&self, id: &ImageId, variant: Variant) -> StoreResult<Bytes>;

    /// Persists a variant, replacing any previous bytes.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the bytes cannot be written.
    fn write(&self, id: &ImageId, variant: Variant, bytes: &[u8]) -> StoreResult<()>;
}
