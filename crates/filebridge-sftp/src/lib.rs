//! SFTP adapter over SSH with password authentication.

pub mod filesystem;
pub mod mapper;

pub use filesystem::{SftpFilesystem, SftpProtocol};
pub use mapper::{SftpEntry, SftpMapper};
