//! Error taxonomy surfaced by the provider and the vault filesystem.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::crypto::keys::KeyAccessError;
use crate::fs::{cleanup::CloseError, content::ContentError, longname::LongNameError, name::NameError};
use crate::vault::config::VaultConfigError;

#[derive(Error, Debug)]
pub enum FsError {
    /// A path handed to a provider that does not own it.
    #[error("Path {path} belongs to a different provider")]
    ProviderMismatch { path: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A directory stream was advanced past its last entry.
    #[error("No more entries in directory stream")]
    NoSuchElement,

    #[error("Illegal state: {0}")]
    IllegalState(&'static str),

    #[error("No such file or directory: {path}")]
    NotFound { path: String },

    #[error("File already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    #[error("Not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Is a directory: {path}")]
    IsADirectory { path: String },

    #[error("Access denied: {path}")]
    AccessDenied { path: String },

    #[error("Read-only file system")]
    ReadOnly,

    #[error("File system is closed")]
    ClosedFileSystem,

    #[error("Channel is closed")]
    ClosedChannel,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("No file system open for vault {}", path.display())]
    FileSystemNotFound { path: PathBuf },

    #[error("Invalid vault URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// A shortened name could not be resolved to its original.
    #[error("Failed to inflate shortened name: {0}")]
    Inflate(#[from] LongNameError),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Close(#[from] CloseError),

    #[error(transparent)]
    Config(#[from] VaultConfigError),

    #[error(transparent)]
    KeyAccess(#[from] KeyAccessError),

    #[error("IO error on {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: String,
    },
}

impl FsError {
    /// Classify an I/O error raised while operating on `path`.
    pub fn io(source: io::Error, path: impl fmt::Display) -> Self {
        let path = path.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => FsError::NotFound { path },
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists { path },
            io::ErrorKind::DirectoryNotEmpty => FsError::DirectoryNotEmpty { path },
            io::ErrorKind::NotADirectory => FsError::NotADirectory { path },
            io::ErrorKind::IsADirectory => FsError::IsADirectory { path },
            io::ErrorKind::PermissionDenied => FsError::AccessDenied { path },
            _ => FsError::Io { source, path },
        }
    }

    pub fn not_found(path: impl fmt::Display) -> Self {
        FsError::NotFound {
            path: path.to_string(),
        }
    }

    pub fn already_exists(path: impl fmt::Display) -> Self {
        FsError::AlreadyExists {
            path: path.to_string(),
        }
    }

    /// The closest `std::io` error class.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            FsError::ProviderMismatch { .. }
            | FsError::InvalidArgument(_)
            | FsError::InvalidUri { .. } => io::ErrorKind::InvalidInput,
            FsError::NotFound { .. } | FsError::FileSystemNotFound { .. } => {
                io::ErrorKind::NotFound
            }
            FsError::AlreadyExists { .. } => io::ErrorKind::AlreadyExists,
            FsError::DirectoryNotEmpty { .. } => io::ErrorKind::DirectoryNotEmpty,
            FsError::NotADirectory { .. } => io::ErrorKind::NotADirectory,
            FsError::IsADirectory { .. } => io::ErrorKind::IsADirectory,
            FsError::AccessDenied { .. } => io::ErrorKind::PermissionDenied,
            FsError::ReadOnly => io::ErrorKind::ReadOnlyFilesystem,
            FsError::Unsupported(_) => io::ErrorKind::Unsupported,
            FsError::Inflate(e) => e.kind(),
            FsError::Close(e) => e.kind(),
            FsError::Io { source, .. } => source.kind(),
            FsError::Name(_) | FsError::Content(_) => io::ErrorKind::InvalidData,
            FsError::NoSuchElement
            | FsError::IllegalState(_)
            | FsError::ClosedFileSystem
            | FsError::ClosedChannel
            | FsError::Config(_)
            | FsError::KeyAccess(_) => io::ErrorKind::Other,
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io { source, .. } => source,
            other => io::Error::new(other.kind(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_classified() {
        let err = FsError::io(io::Error::from(io::ErrorKind::NotFound), "/a");
        assert!(matches!(err, FsError::NotFound { ref path } if path == "/a"));

        let err = FsError::io(io::Error::other("boom"), "/b");
        assert!(matches!(err, FsError::Io { .. }));
        assert_eq!(err.to_string(), "IO error on /b: boom");
    }

    #[test]
    fn test_conversion_keeps_kind() {
        let err: io::Error = FsError::ReadOnly.into();
        assert_eq!(err.kind(), io::ErrorKind::ReadOnlyFilesystem);

        let err: io::Error = FsError::ProviderMismatch {
            path: "/x".to_string(),
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
