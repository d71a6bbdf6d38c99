use dirsync_common::{
    EntryKind, Metadata, Storage, StorageCapabilities, StorageError, WriteOptions,
};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

static NEXT_DEVICE: AtomicU64 = AtomicU64::new(1);

type NodeId = u64;

enum Node {
    File {
        data: Vec<u8>,
        mtime: SystemTime,
    },
    Dir {
        entries: BTreeMap<String, NodeId>,
        mtime: SystemTime,
    },
}

struct Inner {
    nodes: BTreeMap<NodeId, Node>,
    next_id: NodeId,
    root: NodeId,
}

impl Inner {
    fn resolve(&self, path: &Path) -> Result<NodeId, StorageError> {
        let mut current = self.root;
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(name) => {
                    let name = name.to_string_lossy();
                    let Some(Node::Dir { entries, .. }) = self.nodes.get(&current) else {
                        return Err(StorageError::NotADirectory(path.display().to_string()));
                    };
                    current = *entries
                        .get(name.as_ref())
                        .ok_or_else(|| StorageError::NotFound(path.display().to_string()))?;
                }
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath(path.display().to_string()));
                }
            }
        }
        Ok(current)
    }

    /// Resolve the parent directory of `path` and the final name component.
    fn resolve_parent(&self, path: &Path) -> Result<(NodeId, String), StorageError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?;
        let parent_path = path
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?;
        let parent = self.resolve(parent_path)?;
        if !matches!(self.nodes.get(&parent), Some(Node::Dir { .. })) {
            return Err(StorageError::NotADirectory(parent_path.display().to_string()));
        }
        Ok((parent, name))
    }

    fn dir_entries_mut(
        &mut self,
        id: NodeId,
    ) -> Result<&mut BTreeMap<String, NodeId>, StorageError> {
        match self.nodes.get_mut(&id) {
            Some(Node::Dir { entries, .. }) => Ok(entries),
            _ => Err(StorageError::NotADirectory(format!("node {}", id))),
        }
    }
}

/// In-memory backend over an explicit node graph.
///
/// Nodes carry stable inode-like ids and fully caller-controlled mtimes,
/// which makes diffs over this backend deterministic. A directory entry may
/// alias an existing node ([`link`](Self::link)), so tests can build
/// genuinely cyclic trees the way a symlink loop looks on disk.
///
/// Handles are cheap to clone and share one tree.
#[derive(Clone)]
pub struct MemoryStorage {
    instance_id: String,
    device: u64,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let device = NEXT_DEVICE.fetch_add(1, Ordering::Relaxed);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            1,
            Node::Dir {
                entries: BTreeMap::new(),
                mtime: SystemTime::UNIX_EPOCH,
            },
        );
        Self {
            instance_id: format!("memory:{}", device),
            device,
            inner: Arc::new(Mutex::new(Inner {
                nodes,
                next_id: 2,
                root: 1,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a directory entry at `new_path` aliasing the node already at
    /// `existing` (a hard link). Linking a directory into its own subtree
    /// produces a traversal cycle.
    pub fn link(&self, existing: &Path, new_path: &Path) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let target = inner.resolve(existing)?;
        let (parent, name) = inner.resolve_parent(new_path)?;
        let entries = inner.dir_entries_mut(parent)?;
        if entries.contains_key(&name) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                new_path.display().to_string(),
            )));
        }
        entries.insert(name, target);
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn stat(&self, path: &Path) -> Result<Metadata, StorageError> {
        let inner = self.lock();
        let id = inner.resolve(path)?;
        let node = inner
            .nodes
            .get(&id)
            .ok_or_else(|| StorageError::NotFound(path.display().to_string()))?;
        let meta = match node {
            Node::File { data, mtime } => Metadata {
                kind: EntryKind::File,
                size: data.len() as u64,
                modified: *mtime,
                device: Some(self.device),
                inode: Some(id),
            },
            Node::Dir { mtime, .. } => Metadata {
                kind: EntryKind::Dir,
                size: 0,
                modified: *mtime,
                device: Some(self.device),
                inode: Some(id),
            },
        };
        Ok(meta)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, StorageError> {
        let inner = self.lock();
        let id = inner.resolve(path)?;
        match inner.nodes.get(&id) {
            Some(Node::Dir { entries, .. }) => Ok(entries.keys().cloned().collect()),
            _ => Err(StorageError::NotADirectory(path.display().to_string())),
        }
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, StorageError> {
        let inner = self.lock();
        let id = inner.resolve(path)?;
        match inner.nodes.get(&id) {
            Some(Node::File { data, .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            _ => Err(StorageError::NotAFile(path.display().to_string())),
        }
    }

    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::full()
    }

    fn mkdir(&self, path: &Path) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let (parent, name) = inner.resolve_parent(path)?;
        let id = inner.next_id;
        let entries = inner.dir_entries_mut(parent)?;
        if entries.contains_key(&name) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                path.display().to_string(),
            )));
        }
        entries.insert(name, id);
        inner.next_id += 1;
        inner.nodes.insert(
            id,
            Node::Dir {
                entries: BTreeMap::new(),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let (parent, name) = inner.resolve_parent(path)?;
        let id = inner.resolve(path)?;
        match inner.nodes.get(&id) {
            Some(Node::Dir { entries, .. }) => {
                if !entries.is_empty() {
                    return Err(StorageError::Io(io::Error::other(format!(
                        "directory not empty: {}",
                        path.display()
                    ))));
                }
            }
            _ => return Err(StorageError::NotADirectory(path.display().to_string())),
        }
        inner.dir_entries_mut(parent)?.remove(&name);
        inner.nodes.remove(&id);
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let (parent, name) = inner.resolve_parent(path)?;
        let id = inner.resolve(path)?;
        if !matches!(inner.nodes.get(&id), Some(Node::File { .. })) {
            return Err(StorageError::NotAFile(path.display().to_string()));
        }
        inner.dir_entries_mut(parent)?.remove(&name);
        inner.nodes.remove(&id);
        Ok(())
    }

    fn create_file(
        &self,
        path: &Path,
        opts: WriteOptions,
    ) -> Result<Box<dyn Write + Send>, StorageError> {
        // Validate the destination up front so errors surface at open time.
        let inner = self.lock();
        inner.resolve_parent(path)?;
        drop(inner);

        Ok(Box::new(MemoryWriter {
            inner: Arc::clone(&self.inner),
            path: path.to_path_buf(),
            buf: Vec::new(),
            mtime: opts.mtime,
            committed: false,
        }))
    }

    fn set_mtime(&self, path: &Path, mtime: SystemTime) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let id = inner.resolve(path)?;
        match inner.nodes.get_mut(&id) {
            Some(Node::File { mtime: slot, .. }) | Some(Node::Dir { mtime: slot, .. }) => {
                *slot = mtime;
                Ok(())
            }
            None => Err(StorageError::NotFound(path.display().to_string())),
        }
    }
}

/// Buffers writes and commits them as a file node when flushed or dropped.
/// Timestamps handed in through [`WriteOptions`] are applied with the
/// content.
struct MemoryWriter {
    inner: Arc<Mutex<Inner>>,
    path: PathBuf,
    buf: Vec<u8>,
    mtime: Option<SystemTime>,
    committed: bool,
}

impl MemoryWriter {
    fn commit(&mut self) -> io::Result<()> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (parent, name) = inner
            .resolve_parent(&self.path)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let mtime = self.mtime.unwrap_or_else(SystemTime::now);

        let existing = inner
            .dir_entries_mut(parent)
            .map_err(|e| io::Error::other(e.to_string()))?
            .get(&name)
            .copied();
        match existing {
            Some(id) => match inner.nodes.get_mut(&id) {
                Some(Node::File { data, mtime: slot }) => {
                    *data = self.buf.clone();
                    *slot = mtime;
                }
                _ => {
                    return Err(io::Error::other(format!(
                        "not a file: {}",
                        self.path.display()
                    )));
                }
            },
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.nodes.insert(
                    id,
                    Node::File {
                        data: self.buf.clone(),
                        mtime,
                    },
                );
                inner
                    .dir_entries_mut(parent)
                    .map_err(|e| io::Error::other(e.to_string()))?
                    .insert(name, id);
            }
        }
        self.committed = true;
        Ok(())
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit()
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.commit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_memory_write_and_stat() {
        let storage = MemoryStorage::new();
        storage.write_file(Path::new("/a.txt"), b"hello").unwrap();

        let meta = storage.stat(Path::new("/a.txt")).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.size, 5);
        assert!(meta.device.is_some());
        assert!(meta.inode.is_some());
    }

    #[test]
    fn test_memory_inode_is_stable() {
        let storage = MemoryStorage::new();
        storage.write_file(Path::new("/a.txt"), b"x").unwrap();

        let first = storage.stat(Path::new("/a.txt")).unwrap().inode;
        let second = storage.stat(Path::new("/a.txt")).unwrap().inode;
        assert_eq!(first, second);
    }

    #[test]
    fn test_memory_overwrite_keeps_mtime_hint() {
        let storage = MemoryStorage::new();
        let target = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);

        let mut writer = storage
            .create_file(Path::new("/a.txt"), WriteOptions { mtime: Some(target) })
            .unwrap();
        writer.write_all(b"content").unwrap();
        writer.flush().unwrap();
        drop(writer);

        let meta = storage.stat(Path::new("/a.txt")).unwrap();
        assert_eq!(meta.modified, target);
    }

    #[test]
    fn test_memory_rmdir_refuses_non_empty() {
        let storage = MemoryStorage::new();
        storage.mkdir(Path::new("/sub")).unwrap();
        storage.write_file(Path::new("/sub/f"), b"x").unwrap();

        assert!(storage.rmdir(Path::new("/sub")).is_err());

        storage.unlink(Path::new("/sub/f")).unwrap();
        storage.rmdir(Path::new("/sub")).unwrap();
        assert!(!storage.exists(Path::new("/sub")));
    }

    #[test]
    fn test_memory_link_aliases_directory() {
        let storage = MemoryStorage::new();
        storage.mkdir(Path::new("/sub")).unwrap();
        storage.write_file(Path::new("/sub/f"), b"x").unwrap();
        storage.link(Path::new("/sub"), Path::new("/sub/loop")).unwrap();

        // The alias resolves through arbitrarily deep paths.
        let names = storage.read_dir(Path::new("/sub/loop/loop")).unwrap();
        assert_eq!(names, vec!["f".to_string(), "loop".to_string()]);

        let sub = storage.stat(Path::new("/sub")).unwrap();
        let looped = storage.stat(Path::new("/sub/loop")).unwrap();
        assert_eq!(sub.inode, looped.inode);
    }

    #[test]
    fn test_memory_clone_shares_tree() {
        let storage = MemoryStorage::new();
        let handle = storage.clone();
        handle.write_file(Path::new("/a"), b"x").unwrap();
        assert!(storage.exists(Path::new("/a")));
    }
}
