//! Blocking decode/resize/persist steps shared by store workers and the preloader.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use image::DynamicImage;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, ImageId, ImageSource, Variant};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::{BlobStorePort, ImageCodecPort};
use crate::infrastructure::config::StoreConfig;
use crate::infrastructure::image::MemoryImageCache;

/// Where a scheduled load takes its pixels from.
#[derive(Clone)]
pub(crate) enum JobSource {
    /// Persisted `Sized(n)` variant, falling back to the original if it vanished.
    SizedVariant,
    /// Persisted original, resized and written through when `n` is a cached size.
    Original,
    /// Original bytes already in memory from a save. Never written through,
    /// the save derives its own renditions.
    SavedBytes(Bytes),
}

impl JobSource {
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::SizedVariant => "sized",
            Self::Original => "original",
            Self::SavedBytes(_) => "saved",
        }
    }
}

/// Result of a scheduled load.
pub(crate) enum JobOutcome {
    Ready {
        image: Arc<DynamicImage>,
        source: ImageSource,
    },
    Failed(StoreError),
    Abandoned,
}

/// Shared handles needed by every piece of background image work.
#[derive(Clone)]
pub(crate) struct RenditionPipeline {
    pub(crate) blobs: Arc<dyn BlobStorePort>,
    pub(crate) codec: Arc<dyn ImageCodecPort>,
    pub(crate) cache: Arc<MemoryImageCache>,
    pub(crate) config: Arc<StoreConfig>,
}

impl RenditionPipeline {
    /// Reads and decodes a persisted variant.
    pub(crate) fn load_variant(&self, id: &ImageId, variant: Variant) -> StoreResult<DynamicImage> {
        let bytes = self.blobs.read(id, variant)?;
        self.codec.decode(&bytes)
    }

    /// Encodes a rendition and persists it as `variant`.
    pub(crate) fn persist(
        &self,
        id: &ImageId,
        variant: Variant,
        image: &DynamicImage,
    ) -> StoreResult<()> {
        let encoded = self.codec.encode(image, self.config.jpeg_quality())?;
        self.blobs.write(id, variant, &encoded)
    }

    /// Runs one scheduled load. Returns the outcome and any write-through failure.
    ///
    /// The cancellation flag is checked before each expensive step.
    pub(crate) fn run_load(
        &self,
        key: &CacheKey,
        source: JobSource,
        cancelled: &AtomicBool,
    ) -> (JobOutcome, Option<StoreError>) {
        let is_cancelled = || cancelled.load(Ordering::Acquire);
        if is_cancelled() {
            return (JobOutcome::Abandoned, None);
        }
        let write_through = !matches!(source, JobSource::SavedBytes(_))
            && self.config.is_cached_size(key.size);

        let original = match source {
            JobSource::SizedVariant => match self.load_variant(&key.id, Variant::Sized(key.size)) {
                Ok(image) => {
                    trace!(key = %key, "Decoded persisted sized variant");
                    return (self.ready(key, image, ImageSource::SizedVariant), None);
                }
                Err(e) if e.is_not_found() => {
                    debug!(key = %key, "Sized variant vanished, resizing original");
                    self.blobs.read(&key.id, Variant::Original)
                }
                Err(e) => return (JobOutcome::Failed(e), None),
            },
            JobSource::Original => self.blobs.read(&key.id, Variant::Original),
            JobSource::SavedBytes(bytes) => Ok(bytes),
        };
        let original = match original {
            Ok(bytes) => bytes,
            Err(e) => return (JobOutcome::Failed(e), None),
        };

        if is_cancelled() {
            return (JobOutcome::Abandoned, None);
        }
        let decoded = match self.codec.decode(&original) {
            Ok(image) => image,
            Err(e) => return (JobOutcome::Failed(e), None),
        };

        if is_cancelled() {
            return (JobOutcome::Abandoned, None);
        }
        let resized = self.codec.resize(&decoded, key.size);

        let write_error = if write_through {
            self.persist(&key.id, Variant::Sized(key.size), &resized)
                .err()
        } else {
            None
        };

        (self.ready(key, resized, ImageSource::Original), write_error)
    }

    /// Renders and persists the thumbnail and every cached size from freshly saved bytes.
    ///
    /// Sizes in `skip` are left to a scheduled load already writing them.
    /// Returns the failures; none of them affect the save itself.
    pub(crate) fn derive_renditions(
        &self,
        id: &ImageId,
        original: &[u8],
        skip: &[u32],
    ) -> Vec<StoreError> {
        let thumbnail_size = self.config.thumbnail_size();
        let cached_sizes = self.config.cached_sizes();
        if thumbnail_size.is_none() && cached_sizes.is_empty() {
            return Vec::new();
        }

        let decoded = match self.codec.decode(original) {
            Ok(image) => image,
            Err(e) => return vec![e],
        };

        let mut errors = Vec::new();
        if let Some(size) = thumbnail_size {
            let thumbnail = self.codec.resize(&decoded, size);
            if let Err(e) = self.persist(id, Variant::Thumbnail, &thumbnail) {
                errors.push(e);
            }
            self.cache.put(id.clone(), size, Arc::new(thumbnail));
        }
        for &size in cached_sizes.iter().filter(|size| !skip.contains(*size)) {
            let rendition = self.codec.resize(&decoded, size);
            if let Err(e) = self.persist(id, Variant::Sized(size), &rendition) {
                errors.push(e);
            }
        }
        debug!(id = %id, failures = errors.len(), "Derived renditions for saved image");
        errors
    }

    fn ready(&self, key: &CacheKey, image: DynamicImage, source: ImageSource) -> JobOutcome {
        let image = Arc::new(image);
        self.cache.put(key.id.clone(), key.size, Arc::clone(&image));
        JobOutcome::Ready { image, source }
    }
}
