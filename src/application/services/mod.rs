pub mod image_store;
pub mod pending_registry;
mod rendition_pipeline;
pub mod thumbnail_preloader;

pub use image_store::{ImageCallback, ImageStore, SaveCallback, SaveErrorCallback};
pub use pending_registry::{PendingRequestRegistry, PendingWaiter};
pub use thumbnail_preloader::ThumbnailPreloader;

#[cfg(test)]
mod image_store_test;
