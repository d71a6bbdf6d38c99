use crate::cache::CompareCache;
use crate::compare::ContentComparator;
use crate::cycle::CycleDetector;
use crate::filter::PathFilter;
use dirsync_common::{
    AppConfig, Change, ChangeKind, EntryKind, Metadata, Result, SizeLimit, Storage,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Predicate deciding whether a path (and its whole subtree) is skipped.
pub type FilterFn = dyn Fn(&Path) -> bool + Send + Sync;

/// Options recognized by the diff engine.
#[derive(Default)]
pub struct DiffOptions {
    /// Skip a path, and everything below it, when this returns true.
    pub filter: Option<Box<FilterFn>>,

    /// Compare file bytes when size and mtime are inconclusive.
    pub compare_content: bool,

    /// Caller-owned comparator cache, mutated in place across diff calls.
    pub cache: Option<CompareCache>,

    /// Bound on deep-comparison I/O for very large files.
    pub size_limit: Option<SizeLimit>,

    /// Stop one-sided recursion after the immediate entry: a directory
    /// add/del is emitted but its children are not enumerated. Comparison
    /// recursion into shared directories is unaffected.
    pub shallow: bool,
}

impl DiffOptions {
    /// Map a persisted [`AppConfig`] onto engine options. Exclude patterns
    /// become a glob [`PathFilter`]; the cache is left for the caller to
    /// attach.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let filter = if config.exclude_patterns.is_empty() {
            None
        } else {
            let filter = PathFilter::from_patterns(&config.exclude_patterns)?;
            Some(Box::new(move |path: &Path| filter.matches(path)) as Box<FilterFn>)
        };
        Ok(Self {
            filter,
            compare_content: config.compare_content,
            cache: None,
            size_limit: config.size_limit,
            shallow: config.shallow,
        })
    }
}

/// Compute the ordered change list that would make `right` match `left`.
///
/// Walks both trees in lock-step from the root. Fails with
/// [`SyncError::Cycle`] when either tree is self-referential; backend errors
/// propagate unchanged. Within each directory level sibling entries are
/// diffed concurrently, but the resulting sub-lists are concatenated in
/// traversal order, so the output is deterministic: left-side and shared
/// names first, then right-only names, each group in lexical order.
///
/// [`SyncError::Cycle`]: dirsync_common::SyncError::Cycle
pub fn diff(left: &dyn Storage, right: &dyn Storage, options: &DiffOptions) -> Result<Vec<Change>> {
    info!(
        "diffing {} against {}",
        left.instance_id(),
        right.instance_id()
    );
    let walker = Walker {
        left,
        right,
        options,
        comparator: ContentComparator {
            compare_content: options.compare_content,
            cache: options.cache.as_ref(),
            size_limit: options.size_limit,
        },
        left_seen: CycleDetector::new(),
        right_seen: CycleDetector::new(),
    };
    walker.walk(Path::new("/"))
}

enum Task {
    Compare(PathBuf),
    Add(PathBuf),
    Del(PathBuf),
}

struct Walker<'a> {
    left: &'a dyn Storage,
    right: &'a dyn Storage,
    options: &'a DiffOptions,
    comparator: ContentComparator<'a>,
    left_seen: CycleDetector,
    right_seen: CycleDetector,
}

impl<'a> Walker<'a> {
    fn excluded(&self, path: &Path) -> bool {
        self.options.filter.as_ref().map_or(false, |filter| filter(path))
    }

    /// One directory level: list both sides, fan out one task per name, join
    /// them all, and concatenate the sub-lists in traversal order (not in
    /// completion order).
    fn walk(&self, path: &Path) -> Result<Vec<Change>> {
        let (left_names, right_names) = rayon::join(
            || self.left.read_dir(path),
            || self.right.read_dir(path),
        );
        let mut left_names = left_names?;
        let mut right_names = right_names?;
        left_names.sort();
        right_names.sort();
        debug!(
            "walk {:?}: {} left names, {} right names",
            path,
            left_names.len(),
            right_names.len()
        );

        let mut tasks = Vec::with_capacity(left_names.len() + right_names.len());
        for name in &left_names {
            let child = path.join(name);
            if right_names.binary_search(name).is_ok() {
                tasks.push(Task::Compare(child));
            } else {
                tasks.push(Task::Add(child));
            }
        }
        for name in &right_names {
            if left_names.binary_search(name).is_err() {
                tasks.push(Task::Del(path.join(name)));
            }
        }

        let sublists = tasks
            .par_iter()
            .map(|task| match task {
                Task::Compare(child) => self.compare_entry(child),
                Task::Add(child) => self.add_recursive(child),
                Task::Del(child) => self.del_recursive(child),
            })
            .collect::<Result<Vec<Vec<Change>>>>()?;

        Ok(sublists.into_iter().flatten().collect())
    }

    /// A name present on both sides: stat both and dispatch on the types.
    fn compare_entry(&self, path: &Path) -> Result<Vec<Change>> {
        if self.excluded(path) {
            return Ok(Vec::new());
        }
        let (left_meta, right_meta) =
            rayon::join(|| self.left.stat(path), || self.right.stat(path));
        let left_meta = left_meta?;
        let right_meta = right_meta?;
        self.left_seen.check(&left_meta, path)?;
        self.right_seen.check(&right_meta, path)?;

        if left_meta.is_file() && right_meta.is_file() {
            debug!("diff file {:?}", path);
            let is_eq = self
                .comparator
                .files_eq(self.left, self.right, path, &left_meta, &right_meta)?;
            if is_eq {
                Ok(Vec::new())
            } else {
                Ok(vec![Change::new(ChangeKind::Mod, EntryKind::File, path)])
            }
        } else if left_meta.is_dir() && right_meta.is_dir() {
            self.walk(path)
        } else {
            // Type changed: tear the right-side subtree down completely
            // before adding the left-side one, so an incoming directory
            // never collides with a pending file deletion.
            let mut changes = self.del_subtree(path, &right_meta)?;
            changes.extend(self.add_subtree(path, &left_meta)?);
            Ok(changes)
        }
    }

    /// A name present only on the left: everything at and below it is added.
    fn add_recursive(&self, path: &Path) -> Result<Vec<Change>> {
        if self.excluded(path) {
            return Ok(Vec::new());
        }
        let meta = self.left.stat(path)?;
        self.left_seen.check(&meta, path)?;
        self.add_subtree(path, &meta)
    }

    /// Add records for `path` given its already-checked stat: the directory
    /// record first, then the descendants'.
    fn add_subtree(&self, path: &Path, meta: &Metadata) -> Result<Vec<Change>> {
        debug!("add {:?}", path);
        if meta.is_file() {
            return Ok(vec![Change::new(ChangeKind::Add, EntryKind::File, path)]);
        }
        let mut changes = vec![Change::new(ChangeKind::Add, EntryKind::Dir, path)];
        if self.options.shallow {
            return Ok(changes);
        }
        let mut names = self.left.read_dir(path)?;
        names.sort();
        let sublists = names
            .par_iter()
            .map(|name| self.add_recursive(&path.join(name)))
            .collect::<Result<Vec<Vec<Change>>>>()?;
        changes.extend(sublists.into_iter().flatten());
        Ok(changes)
    }

    /// A name present only on the right: everything at and below it is
    /// deleted.
    fn del_recursive(&self, path: &Path) -> Result<Vec<Change>> {
        if self.excluded(path) {
            return Ok(Vec::new());
        }
        let meta = self.right.stat(path)?;
        self.right_seen.check(&meta, path)?;
        self.del_subtree(path, &meta)
    }

    /// Delete records for `path` given its already-checked stat: the
    /// descendants' records first, then the directory's own.
    fn del_subtree(&self, path: &Path, meta: &Metadata) -> Result<Vec<Change>> {
        debug!("del {:?}", path);
        if meta.is_file() {
            return Ok(vec![Change::new(ChangeKind::Del, EntryKind::File, path)]);
        }
        let mut changes = Vec::new();
        if !self.options.shallow {
            let mut names = self.right.read_dir(path)?;
            names.sort();
            let sublists = names
                .par_iter()
                .map(|name| self.del_recursive(&path.join(name)))
                .collect::<Result<Vec<Vec<Change>>>>()?;
            changes.extend(sublists.into_iter().flatten());
        }
        changes.push(Change::new(ChangeKind::Del, EntryKind::Dir, path));
        Ok(changes)
    }
}
