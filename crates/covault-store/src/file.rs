//! File-backed storage, one file per slot

use crate::{Result, Storage, StorageLocation, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A storage slot backed by a single file
#[derive(Clone, Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create a slot for the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file path backing this slot
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot_name(&self) -> String {
        self.path.display().to_string()
    }
}

impl Storage for FileStorage {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn store_raw(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!(slot = %self.slot_name(), bytes = data.len(), "storing file slot");
        fs::write(&self.path, data)?;
        Ok(())
    }

    fn load_raw(&self) -> Result<Vec<u8>> {
        if !self.exists() {
            return Err(StoreError::NotFound(self.slot_name()));
        }
        debug!(slot = %self.slot_name(), "loading file slot");
        Ok(fs::read(&self.path)?)
    }

    fn meta(&self, name: &str) -> Self {
        let mut file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        file_name.push('.');
        file_name.push_str(name);
        Self {
            path: self.path.with_file_name(file_name),
        }
    }
}

/// A directory holding one file per named slot
#[derive(Clone, Debug)]
pub struct FileLocation {
    root: PathBuf,
}

impl FileLocation {
    /// Create a location rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory of this location
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageLocation for FileLocation {
    type Slot = FileStorage;

    fn slot(&self, name: &str) -> FileStorage {
        FileStorage::new(self.root.join(name))
    }
}
