//! In-memory LRU cache of decoded renditions.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, ImageId};

/// Default maximum number of renditions to keep in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// In-memory LRU cache keyed by (image, rendition size).
/// Thread-safe; simultaneous puts of the same key are last-writer-wins.
pub struct MemoryImageCache {
    cache: Mutex<LruCache<CacheKey, Arc<DynamicImage>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the specified capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a rendition, promoting it on hit.
    pub fn get(&self, id: &ImageId, size: u32) -> Option<Arc<DynamicImage>> {
        let key = CacheKey::new(id.clone(), size);
        let found = self.cache.lock().get(&key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
        }
        found
    }

    /// Looks up a rendition without promoting it or touching the statistics.
    pub fn peek(&self, id: &ImageId, size: u32) -> Option<Arc<DynamicImage>> {
        let key = CacheKey::new(id.clone(), size);
        self.cache.lock().peek(&key).cloned()
    }

    /// Returns true if the rendition is cached.
    pub fn contains(&self, id: &ImageId, size: u32) -> bool {
        self.cache
            .lock()
            .contains(&CacheKey::new(id.clone(), size))
    }

    /// Stores a rendition, evicting the least recently used entry when full.
    pub fn put(&self, id: ImageId, size: u32, image: Arc<DynamicImage>) {
        let key = CacheKey::new(id, size);
        debug!(key = %key, "Storing image in memory cache");
        self.cache.lock().put(key, image);
    }

    /// Drops every rendition of one image.
    pub fn evict_image(&self, id: &ImageId) -> usize {
        let mut cache = self.cache.lock();
        let keys: Vec<CacheKey> = cache
            .iter()
            .filter(|(key, _)| &key.id == id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            cache.pop(key);
        }
        if !keys.is_empty() {
            debug!(id = %id, count = keys.len(), "Evicted image from memory cache");
        }
        keys.len()
    }

    /// Returns the number of cached renditions.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all renditions, e.g. on a host low-memory signal.
    pub fn clear(&self) {
        self.cache.lock().clear();
        debug!("Cleared memory image cache");
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached renditions.
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} renditions, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}
