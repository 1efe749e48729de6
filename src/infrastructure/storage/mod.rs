//! Blob storage adapters.

mod file_blob_store;
mod memory_blob_store;

pub use file_blob_store::FileBlobStore;
pub use memory_blob_store::MemoryBlobStore;
