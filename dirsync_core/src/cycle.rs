use dirsync_common::{Metadata, Result, SyncError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// Detects self-referential paths (symlink or hardlink loops) within one
/// tree during a single diff invocation.
///
/// Identities are `(device, inode, basename)` triples. The basename is part
/// of the key because some platforms reuse inode numbers across unrelated
/// names, so device+inode alone over-triggers. Metadata without an inode is
/// exempt, which degrades detection to a no-op for backends without inode
/// semantics.
///
/// The visited set is shared by the sibling tasks of one diff call and
/// nothing persists beyond it.
#[derive(Default)]
pub struct CycleDetector {
    seen: Mutex<HashSet<(u64, u64, String)>>,
}

impl CycleDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the identity behind `path`.
    ///
    /// Fails with [`SyncError::Cycle`] if that identity was already seen in
    /// this invocation. Insertion is an atomic test-and-set, so of two
    /// concurrent racers on the same identity exactly one wins.
    pub fn check(&self, meta: &Metadata, path: &Path) -> Result<()> {
        let (Some(device), Some(inode)) = (meta.device, meta.inode) else {
            return Ok(());
        };
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !seen.insert((device, inode, basename)) {
            return Err(SyncError::Cycle(path.to_path_buf()));
        }
        Ok(())
    }
}
