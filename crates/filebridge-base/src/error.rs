use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

/// Failures surfaced by every filesystem adapter.
///
/// Backend-specific errors (reply codes, client library errors) are mapped
/// onto one of these kinds before they leave an adapter.
#[derive(Debug, Error)]
pub enum FsError {
    /// The transport could not be established or broke mid-operation.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The backend rejected the supplied credentials.
    #[error("authentication failed for {0}")]
    Authentication(String),

    /// The referenced path does not exist, or the backend refused to act on it.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The backend has no primitive for the requested capability.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A local resource (disk, staging directory) failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    pub fn connection(msg: impl Into<String>) -> Self {
        FsError::Connection(msg.into())
    }

    pub fn authentication(user: impl Into<String>) -> Self {
        FsError::Authentication(user.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        FsError::NotFound(path.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FsError::Io {
            path: path.into(),
            source,
        }
    }

    /// Map a local `io::Error`, promoting `NotFound` to the domain kind.
    pub fn from_local(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(path.to_string_lossy().into_owned())
        } else {
            FsError::Io { path, source }
        }
    }

    /// The offending path, when the error carries one.
    pub fn path(&self) -> Option<String> {
        match self {
            FsError::NotFound(path) => Some(path.clone()),
            FsError::Io { path, .. } => Some(path.to_string_lossy().into_owned()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}
