//! WebDAV adapter over HTTP and HTTPS.

pub mod filesystem;
pub mod mapper;
pub mod multistatus;

pub use filesystem::WebDavFilesystem;
pub use mapper::DavMapper;
pub use multistatus::DavEntry;
