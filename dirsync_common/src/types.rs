use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Kind of change recorded for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Present on the left side only.
    Add,
    /// Present on the right side only.
    Del,
    /// Present on both sides with differing content.
    Mod,
}

/// Whether a change applies to a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// A single add/delete/modify record for one path.
///
/// Immutable once created. Serializes with the wire field names `change`,
/// `type` and `path`, so a persisted change list round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub change: ChangeKind,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub path: PathBuf,
}

impl Change {
    pub fn new(change: ChangeKind, kind: EntryKind, path: impl Into<PathBuf>) -> Self {
        Self {
            change,
            kind,
            path: path.into(),
        }
    }
}

/// Metadata for one path as reported by a storage backend.
///
/// `device` and `inode` are absent on backends without inode semantics
/// (archives, content-addressed stores); cycle detection skips such entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
    pub device: Option<u64>,
    pub inode: Option<u64>,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Modification time as integer epoch milliseconds.
    ///
    /// All mtime comparisons happen at this granularity so sub-millisecond
    /// or backend-rounding differences are ignored.
    pub fn mtime_ms(&self) -> i64 {
        system_time_ms(self.modified)
    }
}

/// Convert a timestamp to integer epoch milliseconds (negative before 1970).
pub fn system_time_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

/// Inverse of [`system_time_ms`].
pub fn ms_to_system_time(ms: i64) -> SystemTime {
    if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(ms.unsigned_abs())
    }
}

/// Comparator verdict for one path, keyed on the exact mtime pair it was
/// computed against.
///
/// Serializes with the wire field names `leftMtime`, `rightMtime` and `isEq`.
/// An entry is only trusted while both stored mtimes exactly match the
/// current stat of both sides; there is no other invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub left_mtime: i64,
    pub right_mtime: i64,
    pub is_eq: bool,
}

/// Operation performed for one change during a streaming apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOp {
    Mkdir,
    Rmdir,
    Copy,
    Remove,
}

/// Progress event emitted by the streaming apply, one per change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyEvent {
    pub op: ApplyOp,
    pub path: PathBuf,
}

/// Bound on deep-comparison I/O for very large files.
///
/// When either side of a pair exceeds `max_size`, the comparator assumes
/// `assume_eq` instead of reading content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimit {
    pub max_size: u64,
    #[serde(default)]
    pub assume_eq: bool,
}

/// Persisted application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Compare file bytes when metadata is inconclusive.
    #[serde(default)]
    pub compare_content: bool,

    /// Report one-sided subtrees as a single top-level record.
    #[serde(default)]
    pub shallow: bool,

    /// Skip byte comparison above this size.
    #[serde(default)]
    pub size_limit: Option<SizeLimit>,

    /// Glob patterns excluded from the walk (e.g. "*.o", "/node_modules*")
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Directory holding the persisted comparator cache.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}
