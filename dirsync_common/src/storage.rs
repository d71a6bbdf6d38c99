use crate::{Metadata, StorageError};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Options passed when opening a write stream.
///
/// Backends that can set timestamps atomically with content honor `mtime`;
/// others ignore it and rely on a `set_mtime` call after the stream closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub mtime: Option<SystemTime>,
}

/// Storage backend contract for one side of a diff or apply.
///
/// This trait lets the engine treat local directories, in-memory trees and
/// archives uniformly. Paths handed to a backend are absolute within the
/// backend's own root ("/"-rooted, normalized); each backend scopes them
/// onto its root.
pub trait Storage: Send + Sync {
    /// Uniquely identifies the backend instance (e.g. "local:/srv/data")
    fn instance_id(&self) -> &str;

    /// Metadata for a specific path.
    fn stat(&self, path: &Path) -> Result<Metadata, StorageError>;

    /// Child names of a directory; order is irrelevant.
    fn read_dir(&self, path: &Path) -> Result<Vec<String>, StorageError>;

    /// Opens a file for reading.
    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }

    /// Capabilities of this backend.
    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::read_only()
    }

    /// Create a directory.
    fn mkdir(&self, _path: &Path) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("Write operations not supported".to_string()))
    }

    /// Remove an empty directory.
    fn rmdir(&self, _path: &Path) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("Write operations not supported".to_string()))
    }

    /// Remove a file.
    fn unlink(&self, _path: &Path) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("Write operations not supported".to_string()))
    }

    /// Create a file (replacing any existing one) and return a writer.
    fn create_file(
        &self,
        _path: &Path,
        _opts: WriteOptions,
    ) -> Result<Box<dyn Write + Send>, StorageError> {
        Err(StorageError::Unsupported("Write operations not supported".to_string()))
    }

    /// Set a path's modification time. Backends without timestamp control
    /// may no-op.
    fn set_mtime(&self, _path: &Path, _mtime: SystemTime) -> Result<(), StorageError> {
        Ok(())
    }

    /// Write file content from bytes.
    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let mut writer = self.create_file(path, WriteOptions::default())?;
        writer.write_all(content).map_err(StorageError::Io)?;
        writer.flush().map_err(StorageError::Io)
    }

    /// Copy `path` from this backend to the same path on `dest`, carrying
    /// the source modification time onto the copy.
    fn copy_to(&self, dest: &dyn Storage, path: &Path) -> Result<(), StorageError> {
        let meta = self.stat(path)?;
        let mut reader = self.open_file(path)?;
        let mut writer = dest.create_file(
            path,
            WriteOptions {
                mtime: Some(meta.modified),
            },
        )?;
        std::io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        drop(writer);
        dest.set_mtime(path, meta.modified)
    }
}

/// Capability flags for storage backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageCapabilities {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub create_dir: bool,
    pub set_mtime: bool,
}

impl StorageCapabilities {
    /// Full read-write capabilities (local filesystem)
    pub fn full() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
            create_dir: true,
            set_mtime: true,
        }
    }

    /// Read-only capabilities
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            delete: false,
            create_dir: false,
            set_mtime: false,
        }
    }
}

/// Resolve an engine path against a backend root.
///
/// Rejects any path that would escape the root through `..` components or a
/// platform prefix.
pub fn resolve_scoped(root: &Path, path: &Path) -> Result<PathBuf, StorageError> {
    let mut resolved = root.to_path_buf();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(name) => resolved.push(name),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidPath(path.display().to_string()));
            }
        }
    }
    Ok(resolved)
}
