//! Codec adapter backed by the `image` crate.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::ImageCodecPort;

/// Decodes any format enabled on the `image` crate and re-encodes renditions as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateCodec {
    filter: FilterType,
}

impl ImageCrateCodec {
    /// Creates a codec using Lanczos3 resampling.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    /// Uses a different resampling filter. `Triangle` is much cheaper for large sources.
    #[must_use]
    pub const fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }
}

impl Default for ImageCrateCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodecPort for ImageCrateCodec {
    fn decode(&self, bytes: &[u8]) -> StoreResult<DynamicImage> {
        image::load_from_memory(bytes)
            .map_err(|e| StoreError::decode(format!("Failed to decode image: {e}")))
    }

    fn resize(&self, image: &DynamicImage, max_dimension: u32) -> DynamicImage {
        let (width, height) = image.dimensions();
        // Never upscale; 0 means the source rendering.
        if max_dimension == 0 || width.max(height) <= max_dimension {
            return image.clone();
        }
        image.resize(max_dimension, max_dimension, self.filter)
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> StoreResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(encoder)
            .map_err(|e| StoreError::Encode(format!("Failed to encode JPEG: {e}")))?;
        Ok(buffer.into_inner())
    }
}
