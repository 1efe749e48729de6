mod blob_store_port;
mod codec_port;

pub use blob_store_port::BlobStorePort;
pub use codec_port::ImageCodecPort;
