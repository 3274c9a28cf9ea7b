//! FTP and implicit FTPS adapters.

pub mod client;
pub mod error;
pub mod filesystem;
pub mod list;
pub mod mapper;
pub mod reply;

pub use error::FtpError;
pub use filesystem::{FtpFilesystem, FtpProtocol};
