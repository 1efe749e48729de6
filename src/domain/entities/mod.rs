//! Domain entity definitions.

mod image;

pub use image::{CacheKey, ImageId, ImageSource, LoadToken, LoadedImage, Variant};
