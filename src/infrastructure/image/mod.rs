//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching of decoded renditions with LRU eviction
//! - Decoding, resizing and JPEG encoding via the `image` crate

pub mod codec;
pub mod memory_cache;

pub use codec::ImageCrateCodec;
pub use memory_cache::{CacheStats, DEFAULT_CACHE_CAPACITY, MemoryImageCache};
