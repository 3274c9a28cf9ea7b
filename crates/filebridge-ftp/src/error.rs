use std::io;
use std::path::Path;

use filebridge_base::FsError;
use thiserror::Error;

use crate::reply::Reply;

/// Failures of the FTP control or data channel.
#[derive(Debug, Error)]
pub enum FtpError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Reading or writing the local side of a transfer failed.
    #[error("local i/o error: {0}")]
    Local(io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("server replied {code} {text}")]
    Rejected { code: u16, text: String },
}

impl FtpError {
    pub fn rejected(reply: Reply) -> Self {
        FtpError::Rejected {
            code: reply.code,
            text: reply.text,
        }
    }

    /// Map onto the domain taxonomy for an operation on `path`.
    ///
    /// Permanent negative replies (5xx) and 450 "file unavailable" mean the
    /// server refused to act on the path. Everything else is a transport
    /// problem.
    pub fn into_fs(self, path: &str) -> FsError {
        match self {
            FtpError::Rejected { code, .. } if code >= 500 || code == 450 => FsError::not_found(path),
            other => FsError::connection(other.to_string()),
        }
    }

    /// Like [`FtpError::into_fs`], for a transfer between `path` and the
    /// local file `local`.
    pub fn into_fs_at(self, path: &str, local: &Path) -> FsError {
        match self {
            FtpError::Local(source) => FsError::io(local, source),
            other => other.into_fs(path),
        }
    }
}
