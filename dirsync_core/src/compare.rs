use crate::cache::CompareCache;
use dirsync_common::{CacheEntry, Metadata, SizeLimit, Storage, StorageError};
use std::io::Read;
use std::path::Path;
use tracing::debug;

const COMPARE_BUF_SIZE: usize = 64 * 1024;

/// Decides whether a file pair is equal.
///
/// Holds no state of its own beyond the caller-supplied cache; one instance
/// is scoped to one diff invocation.
pub(crate) struct ContentComparator<'a> {
    pub compare_content: bool,
    pub cache: Option<&'a CompareCache>,
    pub size_limit: Option<SizeLimit>,
}

impl<'a> ContentComparator<'a> {
    /// Equality verdict for `path`, given both sides' stat descriptors.
    ///
    /// Equal size and equal epoch-ms mtime always short-circuit to equal.
    /// Beyond that, metadata alone decides unless content comparison is
    /// enabled, in which case the cache, the size-limit policy and finally a
    /// byte-for-byte read decide. A cache entry is written only when bytes
    /// were actually read, never on a cache hit.
    pub fn files_eq(
        &self,
        left: &dyn Storage,
        right: &dyn Storage,
        path: &Path,
        left_meta: &Metadata,
        right_meta: &Metadata,
    ) -> Result<bool, StorageError> {
        let left_mtime = left_meta.mtime_ms();
        let right_mtime = right_meta.mtime_ms();

        if left_meta.size == right_meta.size && left_mtime == right_mtime {
            return Ok(true);
        }
        if !self.compare_content {
            return Ok(false);
        }

        if let Some(cache) = self.cache {
            if let Some(entry) = cache.get(path) {
                if entry.left_mtime == left_mtime && entry.right_mtime == right_mtime {
                    debug!("cache hit for {:?} (is_eq={})", path, entry.is_eq);
                    return Ok(entry.is_eq);
                }
            }
        }

        if let Some(limit) = self.size_limit {
            if left_meta.size > limit.max_size || right_meta.size > limit.max_size {
                debug!("{:?} exceeds size limit, assuming is_eq={}", path, limit.assume_eq);
                return Ok(limit.assume_eq);
            }
        }

        debug!("comparing content of {:?}", path);
        let is_eq = readers_eq(left.open_file(path)?, right.open_file(path)?)?;

        if let Some(cache) = self.cache {
            cache.put(
                path.to_path_buf(),
                CacheEntry {
                    left_mtime,
                    right_mtime,
                    is_eq,
                },
            );
        }
        Ok(is_eq)
    }
}

/// Byte-for-byte equality of two readers, decided at the first divergent
/// chunk. Streams are consumed and dropped before returning.
pub(crate) fn readers_eq<A: Read, B: Read>(mut a: A, mut b: B) -> Result<bool, StorageError> {
    let mut buf_a = vec![0u8; COMPARE_BUF_SIZE];
    let mut buf_b = vec![0u8; COMPARE_BUF_SIZE];

    loop {
        let n_a = fill(&mut a, &mut buf_a)?;
        let n_b = fill(&mut b, &mut buf_b)?;
        if n_a != n_b || buf_a[..n_a] != buf_b[..n_b] {
            return Ok(false);
        }
        if n_a == 0 {
            return Ok(true);
        }
    }
}

/// Read until `buf` is full or the reader is exhausted, so both sides of a
/// comparison advance in lock-step regardless of short reads.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, StorageError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_readers_eq_identical() {
        assert!(readers_eq(Cursor::new(b"hello"), Cursor::new(b"hello")).unwrap());
    }

    #[test]
    fn test_readers_eq_different_content() {
        assert!(!readers_eq(Cursor::new(b"hello"), Cursor::new(b"hellx")).unwrap());
    }

    #[test]
    fn test_readers_eq_different_length() {
        assert!(!readers_eq(Cursor::new(b"hello"), Cursor::new(b"hello!")).unwrap());
        assert!(!readers_eq(Cursor::new(b""), Cursor::new(b"x")).unwrap());
    }

    #[test]
    fn test_readers_eq_empty() {
        assert!(readers_eq(Cursor::new(b""), Cursor::new(b"")).unwrap());
    }

    #[test]
    fn test_readers_eq_crosses_buffer_boundary() {
        let mut big_a = vec![7u8; COMPARE_BUF_SIZE + 10];
        let big_b = big_a.clone();
        assert!(readers_eq(Cursor::new(big_a.clone()), Cursor::new(big_b.clone())).unwrap());

        big_a[COMPARE_BUF_SIZE + 5] = 8;
        assert!(!readers_eq(Cursor::new(big_a), Cursor::new(big_b)).unwrap());
    }
}
