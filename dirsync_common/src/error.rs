use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("aborting file-tree comparison, a symlink or hardlink loop was detected at {}", .0.display())]
    Cycle(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// True when the failure was a detected traversal loop rather than a
    /// backend error.
    pub fn is_cycle(&self) -> bool {
        matches!(self, SyncError::Cycle(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}
