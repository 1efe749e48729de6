//! Domain layer with core entities and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{ImageId, LoadedImage, Variant};
pub use errors::StoreError;
pub use ports::{BlobStorePort, ImageCodecPort};
