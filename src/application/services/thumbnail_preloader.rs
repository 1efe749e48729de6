//! Bulk thumbnail warm-up.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::domain::entities::{ImageId, Variant};
use crate::domain::errors::StoreResult;

use super::rendition_pipeline::RenditionPipeline;

/// Loads thumbnails into the memory cache synchronously, e.g. for a list view.
///
/// Holds only thread-safe handles, so it can be moved to any thread.
#[derive(Clone)]
pub struct ThumbnailPreloader {
    pipeline: RenditionPipeline,
}

impl ThumbnailPreloader {
    pub(crate) fn new(pipeline: RenditionPipeline) -> Self {
        Self { pipeline }
    }

    /// Warms the cache with the thumbnail of every identifier.
    ///
    /// Persisted thumbnails are decoded; missing ones are rendered from the
    /// original and persisted; identifiers without an original are skipped.
    /// Failures go to the store-wide I/O error handler. Returns how many
    /// thumbnails are now cached.
    pub fn preload(&self, ids: &[ImageId]) -> usize {
        let Some(size) = self.pipeline.config.thumbnail_size() else {
            debug!("Thumbnails disabled, nothing to preload");
            return 0;
        };

        let mut loaded = 0;
        for id in ids {
            match self.preload_one(id, size) {
                Ok(true) => loaded += 1,
                Ok(false) => trace!(id = %id, "No original to preload thumbnail from"),
                Err(e) => self.pipeline.config.report_io_error(&e),
            }
        }
        debug!(requested = ids.len(), loaded = loaded, "Preloaded thumbnails");
        loaded
    }

    fn preload_one(&self, id: &ImageId, size: u32) -> StoreResult<bool> {
        let blobs = &self.pipeline.blobs;
        if blobs.exists(id, Variant::Thumbnail) {
            let thumbnail = self.pipeline.load_variant(id, Variant::Thumbnail)?;
            self.pipeline.cache.put(id.clone(), size, Arc::new(thumbnail));
            return Ok(true);
        }
        if !blobs.exists(id, Variant::Original) {
            return Ok(false);
        }

        let original = self.pipeline.load_variant(id, Variant::Original)?;
        let thumbnail = self.pipeline.codec.resize(&original, size);
        let persisted = self.pipeline.persist(id, Variant::Thumbnail, &thumbnail);
        self.pipeline.cache.put(id.clone(), size, Arc::new(thumbnail));
        persisted.map(|()| true)
    }
}
