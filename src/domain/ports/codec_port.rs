//! Port definition for image decoding and resizing.

use image::DynamicImage;

use crate::domain::errors::StoreResult;

/// Stateless image codec. Safe to call concurrently from worker threads.
pub trait ImageCodecPort: Send + Sync {
    /// Decodes encoded bytes into a bitmap.
    ///
    /// # Errors
    /// Returns `StoreError::Decode` for malformed or unsupported input.
    fn decode(&self, bytes: &[u8]) -> StoreResult<DynamicImage>;

    /// Fits a bitmap within `max_dimension × max_dimension`, preserving aspect ratio.
    fn resize(&self, image: &DynamicImage, max_dimension: u32) -> DynamicImage;

    /// Encodes a bitmap for persistence. `quality` is on a 1..=100 scale.
    ///
    /// # Errors
    /// Returns `StoreError::Encode` if encoding fails.
    fn encode(&self, image: &DynamicImage, quality: u8) -> StoreResult<Vec<u8>>;
}
