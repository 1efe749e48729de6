//! Filesystem blob store for originals, thumbnails and sized renditions.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use crate::domain::entities::{ImageId, Variant};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::BlobStorePort;

const ORIGINALS_DIR: &str = "originals";
const THUMBNAILS_DIR: &str = "thumbnails";

/// Blob store laid out as:
///
/// - `<base>/originals/<id>`
/// - `<base>/thumbnails/<id>`
/// - `<cache>/sized-<n>/<id>`
///
/// The cache root only holds re-derivable renditions and may be purged at any time.
/// Identifiers containing `/` are stored in subdirectories.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    base_dir: PathBuf,
    cache_dir: PathBuf,
}

impl FileBlobStore {
    /// Creates a store rooted at the given directories. Directories are created lazily.
    #[must_use]
    pub fn new(base_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            base_dir,
            cache_dir,
        }
    }

    /// Creates a store in the platform data and cache directories.
    ///
    /// # Errors
    /// Returns error if the platform directories cannot be determined.
    pub fn default_location() -> StoreResult<Self> {
        let dirs = directories::ProjectDirs::from("com", "linuxmobile", "imagestore")
            .ok_or_else(|| StoreError::io("Failed to determine platform directories"))?;
        Ok(Self::new(
            dirs.data_dir().join("images"),
            dirs.cache_dir().join("images"),
        ))
    }

    /// Root of durable variants.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Root of reconstructable sized variants.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the file path of a variant.
    ///
    /// # Errors
    /// Returns error for identifiers that are empty or would escape the store root.
    pub fn variant_path(&self, id: &ImageId, variant: Variant) -> StoreResult<PathBuf> {
        let mut path = match variant {
            Variant::Original => self.base_dir.join(ORIGINALS_DIR),
            Variant::Thumbnail => self.base_dir.join(THUMBNAILS_DIR),
            Variant::Sized(n) => self.cache_dir.join(format!("sized-{n}")),
        };
        let mut pushed = false;
        for segment in id.segments() {
            if segment == "." || segment == ".." {
                return Err(StoreError::io(format!("Invalid image identifier: {id}")));
            }
            path.push(segment);
            pushed = true;
        }
        if !pushed {
            return Err(StoreError::io("Empty image identifier"));
        }
        Ok(path)
    }

    /// Removes every sized variant. Originals and thumbnails are untouched.
    ///
    /// # Errors
    /// Returns error if the cache directory exists but cannot be removed.
    pub fn purge_sized(&self) -> StoreResult<()> {
        match fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => {
                debug!(path = %self.cache_dir.display(), "Purged sized renditions");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(format!("Failed to purge cache dir: {e}"))),
        }
    }
}

impl BlobStorePort for FileBlobStore {
    fn exists(&self, id: &ImageId, variant: Variant) -> bool {
        self.variant_path(id, variant)
            .is_ok_and(|path| path.is_file())
    }

    fn read(&self, id: &ImageId, variant: Variant) -> StoreResult<Bytes> {
        let path = self.variant_path(id, variant)?;
        match fs::read(&path) {
            Ok(bytes) => {
                trace!(id = %id, variant = %variant, path = %path.display(), "Blob read");
                Ok(Bytes::from(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(id = %id, variant = %variant, "Blob missing");
                Err(StoreError::not_found(format!("{id} ({variant})")))
            }
            Err(e) => Err(StoreError::io(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn write(&self, id: &ImageId, variant: Variant, bytes: &[u8]) -> StoreResult<()> {
        let path = self.variant_path(id, variant)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::io(format!("No parent for {}", path.display())))?;
        fs::create_dir_all(parent)
            .map_err(|e| StoreError::io(format!("Failed to create blob dir: {e}")))?;

        let mut file = NamedTempFile::new_in(parent)
            .map_err(|e| StoreError::io(format!("Failed to create temp file: {e}")))?;
        file.write_all(bytes)
            .map_err(|e| StoreError::io(format!("Failed to write blob: {e}")))?;
        file.flush()
            .map_err(|e| StoreError::io(format!("Failed to flush blob: {e}")))?;
        file.persist(&path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to move blob into place");
            StoreError::io(format!("Failed to persist blob: {e}"))
        })?;

        debug!(id = %id, variant = %variant, size = bytes.len(), "Stored blob");
        Ok(())
    }
}
