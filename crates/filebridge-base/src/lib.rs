//! Shared contract, data model and plumbing for filebridge adapters.

pub mod charset;
pub mod error;
pub mod filesystem;
pub mod mapper;
pub mod model;
pub mod permission;
pub mod session;
pub mod staging;

pub use error::{FsError, Result};
pub use filesystem::{FileStream, Filesystem};
pub use mapper::Mapper;
pub use model::{
    is_valid_file_name, normalize_path, FileModel, FileParams, FileTree, ServerModel, ServerType,
};
pub use permission::{Access, Class, Permission};
pub use session::{Protocol, SessionManager, SessionState};
pub use staging::{StagedFile, StagingArea, Transfer};
