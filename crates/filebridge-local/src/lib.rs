//! Filesystem adapter for the local disk.

pub mod archive;
pub mod filesystem;
pub mod mapper;

pub use filesystem::{LocalFilesystem, LOCAL_SCHEME, LOCAL_UUID};
