//! On-disk face image store.
//!
//! Captured crops (`uuid-*.jpg` keys) live in the image directory; any other
//! key names a bundled default asset looked up in the asset directory.

use fame_core::{ImageKind, ImageRef, ImageStore, ImageStoreError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when resolving a bundled asset name.
const ASSET_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct FsImageStore {
    image_dir: PathBuf,
    asset_dir: PathBuf,
}

impl FsImageStore {
    /// Create the store, making sure the image directory exists.
    pub fn open(image_dir: &Path, asset_dir: &Path) -> Result<Self, ImageStoreError> {
        std::fs::create_dir_all(image_dir)?;
        Ok(Self {
            image_dir: image_dir.to_path_buf(),
            asset_dir: asset_dir.to_path_buf(),
        })
    }

    /// Filesystem location of `key`, if it resolves to an existing file.
    pub fn path_of(&self, key: &ImageRef) -> Option<PathBuf> {
        match key.kind() {
            ImageKind::Captured => {
                let path = self.captured_path(key)?;
                path.is_file().then_some(path)
            }
            ImageKind::Bundled => self.bundled_path(key),
        }
    }

    fn captured_path(&self, key: &ImageRef) -> Option<PathBuf> {
        // Keys are single file names; never let one escape the directory.
        let name = key.as_str();
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.image_dir.join(name))
    }

    fn bundled_path(&self, key: &ImageRef) -> Option<PathBuf> {
        let name = key.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        let bare = self.asset_dir.join(name);
        if bare.is_file() {
            return Some(bare);
        }
        ASSET_EXTENSIONS
            .iter()
            .map(|ext| self.asset_dir.join(format!("{name}.{ext}")))
            .find(|path| path.is_file())
    }
}

impl ImageStore for FsImageStore {
    fn save(&mut self, bytes: &[u8]) -> Result<ImageRef, ImageStoreError> {
        let key = ImageRef::generate_captured();
        let path = self.image_dir.join(key.as_str());
        std::fs::write(&path, bytes)?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "face image stored");
        Ok(key)
    }

    fn load(&self, key: &ImageRef) -> Result<Vec<u8>, ImageStoreError> {
        let path = self
            .path_of(key)
            .ok_or_else(|| ImageStoreError::NotFound(key.clone()))?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ImageStoreError::NotFound(key.clone()),
            _ => ImageStoreError::Storage(e),
        })
    }

    fn remove(&mut self, key: &ImageRef) -> Result<(), ImageStoreError> {
        if key.kind() == ImageKind::Bundled {
            tracing::debug!(image = %key, "bundled asset is never removed");
            return Ok(());
        }
        let path = self
            .captured_path(key)
            .ok_or_else(|| ImageStoreError::NotFound(key.clone()))?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "face image removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ImageStoreError::NotFound(key.clone())),
            Err(e) => Err(ImageStoreError::Storage(e)),
        }
    }
}
