use dirsync_common::{EntryKind, Metadata, Storage, StorageError};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Read-only backend over a TAR or gzipped TAR archive.
///
/// The archive is scanned once at open time and entry contents are served
/// from memory afterwards, so repeated reads never re-open the archive.
/// Entries carry no device/inode identity; cycle detection degrades to a
/// no-op for archive-backed trees. All write operations report
/// `Unsupported`.
pub struct TarStorage {
    instance_id: String,
    entries: BTreeMap<PathBuf, ArchiveEntry>,
}

struct ArchiveEntry {
    kind: EntryKind,
    data: Vec<u8>,
    mtime: SystemTime,
}

impl TarStorage {
    pub fn open(archive_path: &Path) -> Result<Self, StorageError> {
        if !archive_path.exists() {
            return Err(StorageError::NotFound(archive_path.display().to_string()));
        }
        let instance_id = format!("tar:{}", archive_path.display());

        let file = File::open(archive_path)?;
        let reader: Box<dyn Read> = if is_gzip_archive(archive_path) {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut archive = tar::Archive::new(reader);

        let mut entries: BTreeMap<PathBuf, ArchiveEntry> = BTreeMap::new();
        entries.insert(
            PathBuf::from("/"),
            ArchiveEntry {
                kind: EntryKind::Dir,
                data: Vec::new(),
                mtime: UNIX_EPOCH,
            },
        );

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = Path::new("/").join(entry.path()?);
            let mtime = UNIX_EPOCH + Duration::from_secs(entry.header().mtime().unwrap_or(0));

            let kind = match entry.header().entry_type() {
                tar::EntryType::Directory => EntryKind::Dir,
                tar::EntryType::Regular => EntryKind::File,
                // Links and special entries have no tree representation.
                _ => continue,
            };
            let data = match kind {
                EntryKind::File => {
                    let mut data = Vec::with_capacity(entry.size() as usize);
                    entry.read_to_end(&mut data)?;
                    data
                }
                EntryKind::Dir => Vec::new(),
            };

            // Archives may omit directory headers; synthesize the ancestors.
            for ancestor in path.ancestors().skip(1) {
                entries
                    .entry(ancestor.to_path_buf())
                    .or_insert_with(|| ArchiveEntry {
                        kind: EntryKind::Dir,
                        data: Vec::new(),
                        mtime: UNIX_EPOCH,
                    });
            }
            entries.insert(path, ArchiveEntry { kind, data, mtime });
        }

        debug!("indexed {} archive entries from {}", entries.len(), instance_id);
        Ok(Self {
            instance_id,
            entries,
        })
    }

    fn entry(&self, path: &Path) -> Result<&ArchiveEntry, StorageError> {
        self.entries
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.display().to_string()))
    }
}

impl Storage for TarStorage {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn stat(&self, path: &Path) -> Result<Metadata, StorageError> {
        let entry = self.entry(path)?;
        Ok(Metadata {
            kind: entry.kind,
            size: entry.data.len() as u64,
            modified: entry.mtime,
            device: None,
            inode: None,
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, StorageError> {
        let entry = self.entry(path)?;
        if entry.kind != EntryKind::Dir {
            return Err(StorageError::NotADirectory(path.display().to_string()));
        }
        let names = self
            .entries
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .filter_map(|candidate| candidate.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        Ok(names)
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, StorageError> {
        let entry = self.entry(path)?;
        if entry.kind != EntryKind::File {
            return Err(StorageError::NotAFile(path.display().to_string()));
        }
        Ok(Box::new(Cursor::new(entry.data.clone())))
    }
}

fn is_gzip_archive(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            ext == "gz" || ext == "tgz"
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn build_tar(dest: &Path, gzip: bool) {
        let file = File::create(dest).unwrap();
        let writer: Box<dyn Write> = if gzip {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
        let mut builder = tar::Builder::new(writer);

        let mut dir_header = tar::Header::new_gnu();
        dir_header.set_entry_type(tar::EntryType::Directory);
        dir_header.set_size(0);
        dir_header.set_mtime(1_600_000_000);
        dir_header.set_mode(0o755);
        dir_header.set_cksum();
        builder
            .append_data(&mut dir_header, "sub/", std::io::empty())
            .unwrap();

        let mut file_header = tar::Header::new_gnu();
        file_header.set_size(5);
        file_header.set_mtime(1_600_000_100);
        file_header.set_mode(0o644);
        file_header.set_cksum();
        builder
            .append_data(&mut file_header, "sub/hello.txt", &b"hello"[..])
            .unwrap();

        let mut root_header = tar::Header::new_gnu();
        root_header.set_size(3);
        root_header.set_mtime(1_600_000_200);
        root_header.set_mode(0o644);
        root_header.set_cksum();
        builder
            .append_data(&mut root_header, "top.txt", &b"top"[..])
            .unwrap();

        let writer = builder.into_inner().unwrap();
        drop(writer);
    }

    #[test]
    fn test_tar_stat_and_read() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("fixture.tar");
        build_tar(&archive_path, false);

        let storage = TarStorage::open(&archive_path).unwrap();

        let meta = storage.stat(Path::new("/sub/hello.txt")).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.size, 5);
        assert_eq!(meta.mtime_ms(), 1_600_000_100_000);
        assert!(meta.inode.is_none());

        let mut content = String::new();
        storage
            .open_file(Path::new("/sub/hello.txt"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_tar_read_dir() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("fixture.tar");
        build_tar(&archive_path, false);

        let storage = TarStorage::open(&archive_path).unwrap();

        let mut names = storage.read_dir(Path::new("/")).unwrap();
        names.sort();
        assert_eq!(names, vec!["sub".to_string(), "top.txt".to_string()]);

        let names = storage.read_dir(Path::new("/sub")).unwrap();
        assert_eq!(names, vec!["hello.txt".to_string()]);
    }

    #[test]
    fn test_tar_gzip_variant() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("fixture.tar.gz");
        build_tar(&archive_path, true);

        let storage = TarStorage::open(&archive_path).unwrap();
        assert!(storage.stat(Path::new("/top.txt")).unwrap().is_file());
    }

    #[test]
    fn test_tar_writes_unsupported() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("fixture.tar");
        build_tar(&archive_path, false);

        let storage = TarStorage::open(&archive_path).unwrap();
        assert!(matches!(
            storage.mkdir(Path::new("/new")),
            Err(StorageError::Unsupported(_))
        ));
        assert!(matches!(
            storage.write_file(Path::new("/new.txt"), b"x"),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn test_tar_missing_archive() {
        let result = TarStorage::open(Path::new("/nonexistent.tar"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
