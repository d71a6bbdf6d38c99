use dirsync_common::{
    resolve_scoped, EntryKind, Metadata, Storage, StorageCapabilities, StorageError, WriteOptions,
};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Local-disk backend scoped to a root directory.
///
/// All engine paths are resolved beneath the root; `..` traversal is
/// rejected. `stat` follows symlinks, so a symlink loop on disk surfaces as
/// a repeated device/inode identity to the cycle detector.
pub struct LocalStorage {
    instance_id: String,
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        let instance_id = format!("local:{}", root.display());
        Self { instance_id, root }
    }

    fn full_path(&self, path: &Path) -> Result<PathBuf, StorageError> {
        resolve_scoped(&self.root, path)
    }
}

impl Storage for LocalStorage {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn stat(&self, path: &Path) -> Result<Metadata, StorageError> {
        let full_path = self.full_path(path)?;
        let meta = fs::metadata(&full_path)?;

        Ok(Metadata {
            kind: if meta.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            },
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            device: device_of(&meta),
            inode: inode_of(&meta),
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, StorageError> {
        let full_path = self.full_path(path)?;
        if !full_path.is_dir() {
            return Err(StorageError::NotADirectory(full_path.display().to_string()));
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&full_path)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, StorageError> {
        let full_path = self.full_path(path)?;
        if !full_path.is_file() {
            return Err(StorageError::NotAFile(full_path.display().to_string()));
        }
        let file = fs::File::open(&full_path)?;
        Ok(Box::new(file))
    }

    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::full()
    }

    fn mkdir(&self, path: &Path) -> Result<(), StorageError> {
        let full_path = self.full_path(path)?;
        fs::create_dir(&full_path)?;
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<(), StorageError> {
        let full_path = self.full_path(path)?;
        fs::remove_dir(&full_path)?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<(), StorageError> {
        let full_path = self.full_path(path)?;
        fs::remove_file(&full_path)?;
        Ok(())
    }

    fn create_file(
        &self,
        path: &Path,
        _opts: WriteOptions,
    ) -> Result<Box<dyn Write + Send>, StorageError> {
        let full_path = self.full_path(path)?;
        // Timestamps can't ride along with content here; set_mtime applies
        // them once the stream closes.
        if let Some(parent) = full_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::File::create(&full_path)?;
        Ok(Box::new(file))
    }

    fn set_mtime(&self, path: &Path, mtime: SystemTime) -> Result<(), StorageError> {
        let full_path = self.full_path(path)?;
        filetime::set_file_mtime(&full_path, filetime::FileTime::from_system_time(mtime))?;
        Ok(())
    }
}

#[cfg(unix)]
fn device_of(meta: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.dev())
}

#[cfg(not(unix))]
fn device_of(_meta: &fs::Metadata) -> Option<u64> {
    None
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> Option<u64> {
    None
}
