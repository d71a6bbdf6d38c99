use dirsync_common::{
    ApplyEvent, ApplyOp, Change, ChangeKind, EntryKind, Result, Storage, SyncError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Apply `changes` in order so the right tree comes to match the left tree.
///
/// Directory operations run strictly in list order, each completed before
/// the next list entry is dispatched, because a child's directory-create
/// must follow its parent's (and a directory-remove must follow its
/// children's deletions). Content copies are spawned as they are
/// encountered and joined before returning; file deletions run inline. The
/// first failure wins and is returned after all in-flight work settles;
/// nothing is rolled back.
pub fn apply_right(left: &dyn Storage, right: &dyn Storage, changes: &[Change]) -> Result<()> {
    info!("applying {} changes to {}", changes.len(), right.instance_id());
    let first_err = Mutex::new(None);
    rayon::scope(|scope| {
        let first_err = &first_err;
        for change in changes {
            if has_failed(first_err) {
                break;
            }
            let result = match (change.change, change.kind) {
                (ChangeKind::Add, EntryKind::Dir) => {
                    debug!("mkdir {:?}", change.path);
                    right.mkdir(&change.path).map_err(SyncError::from)
                }
                (ChangeKind::Del, EntryKind::Dir) => {
                    debug!("rmdir {:?}", change.path);
                    right.rmdir(&change.path).map_err(SyncError::from)
                }
                (ChangeKind::Add, EntryKind::File) | (ChangeKind::Mod, EntryKind::File) => {
                    scope.spawn(move |_| {
                        debug!("copy {:?}", change.path);
                        if let Err(err) = left.copy_to(right, &change.path) {
                            record(first_err, err.into());
                        }
                    });
                    Ok(())
                }
                (ChangeKind::Del, EntryKind::File) => {
                    debug!("unlink {:?}", change.path);
                    right.unlink(&change.path).map_err(SyncError::from)
                }
                // Never produced by the walker; tolerated without effect.
                (ChangeKind::Mod, EntryKind::Dir) => Ok(()),
            };
            if let Err(err) = result {
                record(first_err, err);
                break;
            }
        }
    });
    take_err(first_err)
}

/// Undo `changes` so the left tree is restored to the right tree's prior
/// state.
///
/// Processes the same list in reverse order with each operation's meaning
/// inverted: a directory addition becomes a removal on the left, a deletion
/// becomes a creation, an added file is unlinked and a modified or deleted
/// file is copied back from the right. Reverse order is required for the
/// same parent/child reasons as forward application, mirrored.
pub fn apply_left(left: &dyn Storage, right: &dyn Storage, changes: &[Change]) -> Result<()> {
    info!("reverting {} changes on {}", changes.len(), left.instance_id());
    let first_err = Mutex::new(None);
    rayon::scope(|scope| {
        let first_err = &first_err;
        for change in changes.iter().rev() {
            if has_failed(first_err) {
                break;
            }
            let result = match (change.change, change.kind) {
                (ChangeKind::Add, EntryKind::Dir) => {
                    debug!("rmdir {:?}", change.path);
                    left.rmdir(&change.path).map_err(SyncError::from)
                }
                (ChangeKind::Del, EntryKind::Dir) => {
                    debug!("mkdir {:?}", change.path);
                    left.mkdir(&change.path).map_err(SyncError::from)
                }
                (ChangeKind::Add, EntryKind::File) => {
                    debug!("unlink {:?}", change.path);
                    left.unlink(&change.path).map_err(SyncError::from)
                }
                (ChangeKind::Mod, EntryKind::File) | (ChangeKind::Del, EntryKind::File) => {
                    scope.spawn(move |_| {
                        debug!("copy back {:?}", change.path);
                        if let Err(err) = right.copy_to(left, &change.path) {
                            record(first_err, err.into());
                        }
                    });
                    Ok(())
                }
                (ChangeKind::Mod, EntryKind::Dir) => Ok(()),
            };
            if let Err(err) = result {
                record(first_err, err);
                break;
            }
        }
    });
    take_err(first_err)
}

fn has_failed(slot: &Mutex<Option<SyncError>>) -> bool {
    match slot.lock() {
        Ok(guard) => guard.is_some(),
        Err(poisoned) => poisoned.into_inner().is_some(),
    }
}

fn record(slot: &Mutex<Option<SyncError>>, err: SyncError) {
    let mut guard = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if guard.is_none() {
        *guard = Some(err);
    }
}

fn take_err(slot: Mutex<Option<SyncError>>) -> Result<()> {
    match slot.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Cooperative cancellation handle for an [`ApplyStream`].
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Begin applying `changes` to the right tree lazily.
///
/// Semantically identical to [`apply_right`] but exposed as a pull-based,
/// single-consumer, non-restartable sequence: pulling the next item performs
/// that change's I/O and then yields its [`ApplyEvent`]. Operations run
/// strictly sequentially, copies included, so cancellation can land between
/// any two discrete steps.
pub fn apply_right_stream<'a>(
    left: &'a dyn Storage,
    right: &'a dyn Storage,
    changes: &'a [Change],
) -> ApplyStream<'a> {
    ApplyStream {
        left,
        right,
        changes: changes.iter(),
        cancel: CancelHandle::default(),
        failed: false,
    }
}

/// Lazy forward application of a change list. See [`apply_right_stream`].
pub struct ApplyStream<'a> {
    left: &'a dyn Storage,
    right: &'a dyn Storage,
    changes: std::slice::Iter<'a, Change>,
    cancel: CancelHandle,
    failed: bool,
}

impl<'a> ApplyStream<'a> {
    /// Handle for cancelling the stream while it is being consumed.
    ///
    /// After cancellation the operation already in flight completes, no
    /// further operation starts, and the sequence ends cleanly (no error).
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn apply_one(&self, change: &Change) -> Result<Option<ApplyOp>> {
        match (change.change, change.kind) {
            (ChangeKind::Add, EntryKind::Dir) => {
                debug!("mkdir {:?}", change.path);
                self.right.mkdir(&change.path)?;
                Ok(Some(ApplyOp::Mkdir))
            }
            (ChangeKind::Del, EntryKind::Dir) => {
                debug!("rmdir {:?}", change.path);
                self.right.rmdir(&change.path)?;
                Ok(Some(ApplyOp::Rmdir))
            }
            (ChangeKind::Add, EntryKind::File) | (ChangeKind::Mod, EntryKind::File) => {
                debug!("copy {:?}", change.path);
                self.left.copy_to(self.right, &change.path)?;
                Ok(Some(ApplyOp::Copy))
            }
            (ChangeKind::Del, EntryKind::File) => {
                debug!("unlink {:?}", change.path);
                self.right.unlink(&change.path)?;
                Ok(Some(ApplyOp::Remove))
            }
            (ChangeKind::Mod, EntryKind::Dir) => Ok(None),
        }
    }
}

impl<'a> Iterator for ApplyStream<'a> {
    type Item = Result<ApplyEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cancel.is_cancelled() {
            return None;
        }
        loop {
            let change = self.changes.next()?;
            match self.apply_one(change) {
                Ok(Some(op)) => {
                    return Some(Ok(ApplyEvent {
                        op,
                        path: change.path.clone(),
                    }))
                }
                Ok(None) => continue,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
