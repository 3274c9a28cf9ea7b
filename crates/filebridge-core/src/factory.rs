//! Builds the adapter matching a server's type.

use std::path::{Path, PathBuf};

use filebridge_base::{Filesystem, Result, ServerModel, ServerType};
use filebridge_ftp::FtpFilesystem;
use filebridge_local::LocalFilesystem;
use filebridge_sftp::SftpFilesystem;
use filebridge_webdav::WebDavFilesystem;
use tracing::debug;

pub fn open_local(root: impl Into<PathBuf>) -> Box<dyn Filesystem> {
    Box::new(LocalFilesystem::new(root))
}

/// Open the adapter for `server`, staging transfers under `cache_dir`.
pub fn open_server(server: &ServerModel, cache_dir: &Path) -> Result<Box<dyn Filesystem>> {
    debug!("opening {} server {} at {}", server.server_type, server.name, server.endpoint());
    let filesystem: Box<dyn Filesystem> = match server.server_type {
        ServerType::Ftp | ServerType::Ftps => Box::new(FtpFilesystem::new(server.clone(), cache_dir)),
        ServerType::Sftp => Box::new(SftpFilesystem::new(server.clone(), cache_dir)),
        ServerType::Webdav | ServerType::Webdavs => {
            Box::new(WebDavFilesystem::new(server.clone(), cache_dir)?)
        }
    };
    Ok(filesystem)
}
