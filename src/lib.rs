//! imagestore - A multi-tier image cache with an asynchronous resize pipeline.
//!
//! Images are addressed by identifier and resolved against an in-memory
//! rendition cache, persisted resized variants and finally the original.
//! Decoding, resizing and writing run on the tokio blocking pool while
//! callbacks are delivered on the thread that owns the store.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the store orchestrator and its services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing storage, codec, and configuration adapters.
pub mod infrastructure;

pub use application::services::{ImageStore, ThumbnailPreloader};
pub use domain::entities::{CacheKey, ImageId, ImageSource, LoadToken, LoadedImage, Variant};
pub use domain::errors::{StoreError, StoreResult};
pub use infrastructure::config::StoreConfig;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "imagestore";
