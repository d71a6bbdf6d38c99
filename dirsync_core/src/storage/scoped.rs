use dirsync_common::{
    resolve_scoped, Metadata, Storage, StorageCapabilities, StorageError, WriteOptions,
};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Adapter that confines another backend to a subtree.
///
/// Every operation is rebased beneath a fixed root before it reaches the
/// wrapped backend, so a `ScopedStorage` over `/projects/site` behaves like
/// a backend whose own root is that directory. `..` traversal out of the
/// scope is rejected.
pub struct ScopedStorage {
    instance_id: String,
    inner: Arc<dyn Storage>,
    root: PathBuf,
}

impl ScopedStorage {
    pub fn new(inner: Arc<dyn Storage>, root: PathBuf) -> Self {
        let instance_id = format!("scoped:{}:{}", inner.instance_id(), root.display());
        Self {
            instance_id,
            inner,
            root,
        }
    }

    fn rebase(&self, path: &Path) -> Result<PathBuf, StorageError> {
        resolve_scoped(&self.root, path)
    }
}

impl Storage for ScopedStorage {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn stat(&self, path: &Path) -> Result<Metadata, StorageError> {
        self.inner.stat(&self.rebase(path)?)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, StorageError> {
        self.inner.read_dir(&self.rebase(path)?)
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, StorageError> {
        self.inner.open_file(&self.rebase(path)?)
    }

    fn capabilities(&self) -> StorageCapabilities {
        self.inner.capabilities()
    }

    fn mkdir(&self, path: &Path) -> Result<(), StorageError> {
        self.inner.mkdir(&self.rebase(path)?)
    }

    fn rmdir(&self, path: &Path) -> Result<(), StorageError> {
        self.inner.rmdir(&self.rebase(path)?)
    }

    fn unlink(&self, path: &Path) -> Result<(), StorageError> {
        self.inner.unlink(&self.rebase(path)?)
    }

    fn create_file(
        &self,
        path: &Path,
        opts: WriteOptions,
    ) -> Result<Box<dyn Write + Send>, StorageError> {
        self.inner.create_file(&self.rebase(path)?, opts)
    }

    fn set_mtime(&self, path: &Path, mtime: SystemTime) -> Result<(), StorageError> {
        self.inner.set_mtime(&self.rebase(path)?, mtime)
    }
}
