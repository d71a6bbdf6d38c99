use dirsync_common::{CacheEntry, SyncError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Comparator verdict cache, keyed by path.
///
/// The cache is caller-owned state with unbounded lifetime: the engine reads
/// and writes entries but never evicts or expires them. Staleness is
/// detected structurally by the comparator (an entry is ignored unless both
/// stored mtimes exactly match the current stat of both sides), so there is
/// nothing to invalidate here.
///
/// Handles are cheap to clone and share one underlying map; per-key reads
/// and writes are atomic.
#[derive(Clone, Default)]
pub struct CompareCache {
    entries: Arc<RwLock<HashMap<PathBuf, CacheEntry>>>,
}

impl CompareCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache previously written by [`persist`](Self::persist).
    /// A missing file yields an empty cache.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = fs::read(path)?;
        let entries: HashMap<PathBuf, CacheEntry> =
            bincode::deserialize(&data).map_err(|e| SyncError::Serialization(e.to_string()))?;
        debug!("Loaded {} comparator cache entries", entries.len());
        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    /// Cached verdict for a path.
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.entries.read().ok()?.get(path).copied()
    }

    /// Store a verdict.
    pub fn put(&self, path: PathBuf, entry: CacheEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(path, entry);
        }
    }

    /// Cached paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Persist to disk atomically (write a temp file, then rename over the
    /// target so a crash never leaves a corrupt cache).
    pub fn persist(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries = self
            .entries
            .read()
            .map_err(|e| SyncError::Serialization(format!("Lock error: {}", e)))?;
        let data =
            bincode::serialize(&*entries).map_err(|e| SyncError::Serialization(e.to_string()))?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data)?;
        fs::rename(&temp_path, path)?;

        debug!("Persisted {} comparator cache entries", entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_basic() {
        let cache = CompareCache::new();
        let entry = CacheEntry {
            left_mtime: 100,
            right_mtime: 200,
            is_eq: true,
        };

        assert!(cache.get(Path::new("/a")).is_none());

        cache.put(PathBuf::from("/a"), entry);
        assert_eq!(cache.get(Path::new("/a")), Some(entry));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.paths(), vec![PathBuf::from("/a")]);
    }

    #[test]
    fn test_cache_clone_shares_entries() {
        let cache = CompareCache::new();
        let handle = cache.clone();
        handle.put(
            PathBuf::from("/a"),
            CacheEntry {
                left_mtime: 1,
                right_mtime: 2,
                is_eq: false,
            },
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_persistence() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("compare_cache.bin");
        let entry = CacheEntry {
            left_mtime: 1_700_000_000_000,
            right_mtime: 1_700_000_001_500,
            is_eq: true,
        };

        {
            let cache = CompareCache::new();
            cache.put(PathBuf::from("/a"), entry);
            cache.persist(&path).unwrap();
        }

        {
            let cache = CompareCache::load(&path).unwrap();
            assert_eq!(cache.get(Path::new("/a")), Some(entry));
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let cache = CompareCache::load(&temp.path().join("absent.bin")).unwrap();
        assert!(cache.is_empty());
    }
}
