//! Domain types for stored and cached images.

use std::sync::Arc;

use uuid::Uuid;

/// Identifier of a stored image.
///
/// Opaque to the store. A `/` inside the identifier groups images into
/// directories on persistent storage and has no other meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub String);

impl ImageId {
    /// Creates a new `ImageId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the identifier into its directory groups and final name.
    ///
    /// Empty segments (leading, trailing or doubled separators) are skipped.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Persisted rendition of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// The bytes exactly as saved by the caller.
    Original,
    /// Thumbnail at the configured thumbnail dimension.
    Thumbnail,
    /// Rendition fitted within `n × n`. Always re-derivable from the original.
    Sized(u32),
}

impl Variant {
    /// Returns true for variants that can be rebuilt from the original.
    #[must_use]
    pub const fn is_derived(self) -> bool {
        !matches!(self, Self::Original)
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Thumbnail => write!(f, "thumbnail"),
            Self::Sized(n) => write!(f, "sized-{n}"),
        }
    }
}

/// Key of a decoded rendition in the memory cache.
///
/// `size` is the maximum dimension the bitmap was rendered for, so the
/// thumbnail and an app-sized rendering of the same image are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Image the rendition belongs to.
    pub id: ImageId,
    /// Requested maximum dimension.
    pub size: u32,
}

impl CacheKey {
    /// Creates a cache key.
    #[must_use]
    pub fn new(id: ImageId, size: u32) -> Self {
        Self { id, size }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.size)
    }
}

/// Opaque handle returned by a load request, used to cancel it.
///
/// Tokens never reference waiter state directly, so cancelling after the
/// waiter fired or was drained is always safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadToken(Uuid);

impl LoadToken {
    /// Generates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LoadToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LoadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Exact rendition found in the memory cache.
    MemoryCache,
    /// Cached thumbnail delivered ahead of the requested rendition.
    InterimThumbnail,
    /// Decoded from a persisted sized variant.
    SizedVariant,
    /// Decoded and resized from the original.
    Original,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::InterimThumbnail => write!(f, "thumbnail"),
            Self::SizedVariant => write!(f, "sized"),
            Self::Original => write!(f, "original"),
        }
    }
}

/// An image delivered to a load callback.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The image ID.
    pub id: ImageId,
    /// Maximum dimension the caller asked for.
    pub requested_size: u32,
    /// Decoded bitmap.
    pub image: Arc<image::DynamicImage>,
    /// Tier that satisfied the request.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Returns true if this is a low-fidelity thumbnail and a further
    /// delivery of the requested size may follow.
    #[must_use]
    pub fn is_interim(&self) -> bool {
        self.source == ImageSource::InterimThumbnail
    }

    /// Returns the larger of width and height.
    #[must_use]
    pub fn max_dimension(&self) -> u32 {
        self.image.width().max(self.image.height())
    }
}
