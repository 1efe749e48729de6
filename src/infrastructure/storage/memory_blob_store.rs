//! In-memory blob store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::domain::entities::{ImageId, Variant};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::BlobStorePort;

/// Volatile blob store for hosts without persistent media, and for tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(ImageId, Variant), Bytes>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful reads so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Removes every sized variant.
    pub fn purge_sized(&self) {
        self.blobs
            .write()
            .retain(|(_, variant), _| !matches!(variant, Variant::Sized(_)));
    }
}

impl BlobStorePort for MemoryBlobStore {
    fn exists(&self, id: &ImageId, variant: Variant) -> bool {
        self.blobs.read().contains_key(&(id.clone(), variant))
    }

    fn read(&self, id: &ImageId, variant: Variant) -> StoreResult<Bytes> {
        let bytes = self
            .blobs
            .read()
            .get(&(id.clone(), variant))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("{id} ({variant})")))?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(bytes)
    }

    fn write(&self, id: &ImageId, variant: Variant, bytes: &[u8]) -> StoreResult<()> {
        self.blobs
            .write()
            .insert((id.clone(), variant), Bytes::copy_from_slice(bytes));
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
