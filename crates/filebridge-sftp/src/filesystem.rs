use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use filebridge_base::{
    is_valid_file_name, FileModel, FileParams, FileTree, Filesystem, FsError, Mapper, Protocol,
    Result, ServerModel, SessionManager, SessionState, StagingArea, Transfer,
};
use russh::client::{self, Handle};
use russh::Disconnect;
use russh_keys::key::PublicKey;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::mapper::{SftpEntry, SftpMapper};

/// SSH client callbacks.
pub struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host keys are not pinned; the fingerprint is logged for auditing.
    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        debug!("server key {}", server_public_key.fingerprint());
        Ok(true)
    }
}

/// An authenticated SSH connection with the `sftp` subsystem open.
pub struct SftpConnection {
    handle: Handle<ClientHandler>,
    sftp: Option<SftpSession>,
}

impl SftpConnection {
    fn sftp(&self) -> Result<&SftpSession> {
        self.sftp
            .as_ref()
            .ok_or_else(|| FsError::connection("sftp subsystem not started"))
    }
}

/// SSH handshake, password login and subsystem start.
pub struct SftpProtocol;

#[async_trait]
impl Protocol for SftpProtocol {
    type Session = SftpConnection;

    async fn connect(&self, server: &ServerModel) -> Result<SftpConnection> {
        let config = Arc::new(client::Config::default());
        let handle = client::connect(config, (server.address.as_str(), server.port), ClientHandler)
            .await
            .map_err(|e| FsError::connection(format!("{}: {}", server.endpoint(), e)))?;
        Ok(SftpConnection { handle, sftp: None })
    }

    async fn authenticate(&self, session: &mut SftpConnection, server: &ServerModel) -> Result<()> {
        let accepted = session
            .handle
            .authenticate_password(server.username.as_str(), server.password.as_str())
            .await
            .map_err(|e| FsError::connection(e.to_string()))?;
        if !accepted {
            return Err(FsError::authentication(&server.username));
        }

        let channel = session
            .handle
            .channel_open_session()
            .await
            .map_err(|e| FsError::connection(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| FsError::connection(e.to_string()))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| FsError::connection(e.to_string()))?;
        session.sftp = Some(sftp);
        Ok(())
    }

    async fn disconnect(&self, session: SftpConnection) {
        if let Some(sftp) = session.sftp {
            if let Err(e) = sftp.close().await {
                debug!("sftp close failed: {}", e);
            }
        }
        if let Err(e) = session
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("ssh disconnect failed: {}", e);
        }
    }
}

/// Map an SFTP failure for an operation on `path`.
fn map_error(error: SftpError, path: &str) -> FsError {
    match error {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoConnection | StatusCode::ConnectionLost => {
                FsError::connection(status.error_message)
            }
            StatusCode::OpUnsupported => FsError::Unsupported("sftp request"),
            _ => FsError::not_found(path),
        },
        other => FsError::connection(other.to_string()),
    }
}

/// SFTP server reached over SSH with a password.
///
/// Renaming onto an existing file replaces it, but not atomically: the
/// destination is removed before the rename is sent, so a failed rename
/// loses the old destination. Copies go through the staging area (download
/// then upload); directories cannot be copied.
pub struct SftpFilesystem {
    manager: SessionManager<SftpProtocol>,
    staging: StagingArea,
}

impl SftpFilesystem {
    pub fn new(server: ServerModel, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            manager: SessionManager::new(SftpProtocol, server),
            staging: StagingArea::new(cache_dir),
        }
    }

    pub fn state(&self) -> SessionState {
        self.manager.state()
    }
}

#[async_trait]
impl Filesystem for SftpFilesystem {
    fn default_location(&self) -> FileModel {
        let server = self.manager.server();
        FileModel::directory(server.server_type.scheme(), &server.uuid, &server.initial_dir)
    }

    async fn provide_directory(&self, parent: &FileModel) -> Result<FileTree> {
        let path = parent.path().to_string();
        let entries = self.manager.run(|session| Box::pin(read_dir(session, path))).await?;
        Ok(SftpMapper.to_file_tree(parent, entries))
    }

    async fn exists(&self, model: &FileModel) -> Result<bool> {
        let path = model.path().to_string();
        self.manager.run(|session| Box::pin(exists(session, path))).await
    }

    async fn create_file(&self, model: &FileModel) -> Result<()> {
        let path = model.path().to_string();
        let directory = model.directory;
        self.manager
            .run(|session| Box::pin(create(session, path, directory)))
            .await?;
        info!("created {}", model.file_uri);
        Ok(())
    }

    async fn rename_file(&self, source: &FileModel, dest: &FileModel) -> Result<()> {
        let from = source.path().to_string();
        let to = dest.path().to_string();
        self.manager
            .run(|session| Box::pin(rename(session, from, to)))
            .await?;
        info!("renamed {} -> {}", source.file_uri, dest.file_uri);
        Ok(())
    }

    async fn delete_file(&self, model: &FileModel) -> Result<()> {
        let path = model.path().to_string();
        let directory = model.directory;
        self.manager
            .run(|session| Box::pin(remove(session, path, directory)))
            .await?;
        info!("deleted {}", model.file_uri);
        Ok(())
    }

    async fn copy_file(&self, source: &FileModel, dest: &FileModel) -> Result<()> {
        if source.directory {
            return Err(FsError::Unsupported("directory copy"));
        }
        self.staging.copy_through(self, source, dest).await?;
        info!("copied {} -> {}", source.file_uri, dest.file_uri);
        Ok(())
    }

    async fn load_file(&self, model: &FileModel, params: &FileParams) -> Result<String> {
        self.staging.load(self, model, params).await
    }

    async fn save_file(&self, model: &FileModel, text: &str, params: &FileParams) -> Result<()> {
        self.staging.save(self, model, text, params).await?;
        info!("saved {}", model.file_uri);
        Ok(())
    }
}

#[async_trait]
impl Transfer for SftpFilesystem {
    async fn download(&self, model: &FileModel, local: &Path) -> Result<()> {
        let path = model.path().to_string();
        let local = local.to_path_buf();
        self.manager
            .run(|session| Box::pin(download(session, path, local)))
            .await
    }

    async fn upload(&self, local: &Path, model: &FileModel) -> Result<()> {
        let path = model.path().to_string();
        let local = local.to_path_buf();
        self.manager
            .run(|session| Box::pin(upload(session, local, path)))
            .await
    }
}

async fn read_dir(session: &mut SftpConnection, path: String) -> Result<Vec<SftpEntry>> {
    let entries = session
        .sftp()?
        .read_dir(path.as_str())
        .await
        .map_err(|e| map_error(e, &path))?;

    Ok(entries
        .map(|entry| {
            let metadata = entry.metadata();
            SftpEntry {
                name: entry.file_name(),
                size: metadata.size.unwrap_or_default(),
                mode: metadata.permissions.unwrap_or_default(),
                mtime: metadata.mtime.unwrap_or_default(),
                directory: metadata.is_dir(),
            }
        })
        .collect())
}

async fn exists(session: &mut SftpConnection, path: String) -> Result<bool> {
    session
        .sftp()?
        .try_exists(path.as_str())
        .await
        .map_err(|e| map_error(e, &path))
}

async fn create(session: &mut SftpConnection, path: String, directory: bool) -> Result<()> {
    let sftp = session.sftp()?;
    if directory {
        return sftp
            .create_dir(path.as_str())
            .await
            .map_err(|e| map_error(e, &path));
    }
    let mut file = sftp
        .create(path.as_str())
        .await
        .map_err(|e| map_error(e, &path))?;
    file.shutdown()
        .await
        .map_err(|e| FsError::connection(e.to_string()))
}

async fn rename(session: &mut SftpConnection, from: String, to: String) -> Result<()> {
    let sftp = session.sftp()?;
    if !sftp.try_exists(from.as_str()).await.map_err(|e| map_error(e, &from))? {
        return Err(FsError::not_found(from));
    }
    // SFTP v3 refuses to rename onto an existing file, and russh-sftp has
    // no posix-rename extension to replace it in one step.
    match sftp.metadata(to.as_str()).await {
        Ok(metadata) if !metadata.is_dir() => {
            debug!("replacing {}", to);
            sftp.remove_file(to.as_str())
                .await
                .map_err(|e| map_error(e, &to))?;
        }
        _ => {}
    }
    sftp.rename(from.as_str(), to.as_str())
        .await
        .map_err(|e| map_error(e, &from))
}

async fn remove(session: &mut SftpConnection, path: String, directory: bool) -> Result<()> {
    let sftp = session.sftp()?;
    if !directory {
        return sftp
            .remove_file(path.as_str())
            .await
            .map_err(|e| map_error(e, &path));
    }

    let mut pending = vec![path];
    let mut directories = Vec::new();
    while let Some(dir) = pending.pop() {
        let entries = sftp
            .read_dir(dir.as_str())
            .await
            .map_err(|e| map_error(e, &dir))?;
        for entry in entries {
            let name = entry.file_name();
            if !is_valid_file_name(&name) {
                continue;
            }
            let child = format!("{}/{}", dir.trim_end_matches('/'), name);
            if entry.metadata().is_dir() {
                pending.push(child);
            } else {
                sftp.remove_file(child.as_str())
                    .await
                    .map_err(|e| map_error(e, &child))?;
            }
        }
        directories.push(dir);
    }
    for dir in directories.iter().rev() {
        sftp.remove_dir(dir.as_str())
            .await
            .map_err(|e| map_error(e, dir))?;
    }
    Ok(())
}

async fn download(session: &mut SftpConnection, path: String, local: PathBuf) -> Result<()> {
    let mut remote = session
        .sftp()?
        .open(path.as_str())
        .await
        .map_err(|e| map_error(e, &path))?;
    let mut file = tokio::fs::File::create(&local)
        .await
        .map_err(|e| FsError::io(&local, e))?;
    let count = tokio::io::copy(&mut remote, &mut file)
        .await
        .map_err(|e| FsError::connection(e.to_string()))?;
    file.flush().await.map_err(|e| FsError::io(&local, e))?;
    if let Err(e) = remote.shutdown().await {
        warn!("failed to close {}: {}", path, e);
    }
    debug!("downloaded {} bytes from {}", count, path);
    Ok(())
}

async fn upload(session: &mut SftpConnection, local: PathBuf, path: String) -> Result<()> {
    let mut file = tokio::fs::File::open(&local)
        .await
        .map_err(|e| FsError::io(&local, e))?;
    let mut remote = session
        .sftp()?
        .create(path.as_str())
        .await
        .map_err(|e| map_error(e, &path))?;
    let count = tokio::io::copy(&mut file, &mut remote)
        .await
        .map_err(|e| FsError::connection(e.to_string()))?;
    remote
        .shutdown()
        .await
        .map_err(|e| FsError::connection(e.to_string()))?;
    debug!("uploaded {} bytes to {}", count, path);
    Ok(())
}
