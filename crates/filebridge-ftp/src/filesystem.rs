use std::path::{Path, PathBuf};

use async_trait::async_trait;
use filebridge_base::{
    is_valid_file_name, FileModel, FileParams, FileTree, Filesystem, FsError, Mapper, Protocol,
    Result, ServerModel, ServerType, SessionManager, SessionState, StagingArea, Transfer,
};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::client::{FtpClient, Tls};
use crate::error::FtpError;
use crate::list;
use crate::mapper::FtpMapper;

/// Handshake for plain FTP and implicit FTPS.
pub struct FtpProtocol;

#[async_trait]
impl Protocol for FtpProtocol {
    type Session = FtpClient;

    async fn connect(&self, server: &ServerModel) -> Result<FtpClient> {
        let tls = match server.server_type {
            ServerType::Ftps => Some(
                Tls::new(&server.address, server.accept_invalid_certs)
                    .map_err(|e| FsError::connection(e.to_string()))?,
            ),
            _ => None,
        };
        FtpClient::connect(&server.address, server.port, tls)
            .await
            .map_err(|e| FsError::connection(format!("{}: {}", server.endpoint(), e)))
    }

    async fn authenticate(&self, session: &mut FtpClient, server: &ServerModel) -> Result<()> {
        match session.login(&server.username, &server.password).await {
            Ok(()) => {}
            Err(FtpError::Rejected { code, text }) => {
                debug!("login rejected: {} {}", code, text);
                return Err(FsError::authentication(&server.username));
            }
            Err(e) => return Err(FsError::connection(e.to_string())),
        }
        session
            .prepare()
            .await
            .map_err(|e| FsError::connection(e.to_string()))
    }

    async fn disconnect(&self, session: FtpClient) {
        session.quit().await;
    }
}

/// FTP or implicit FTPS server, depending on the server type.
///
/// Each operation logs in, runs and logs out. Collision policy for
/// `rename_file` and `create_file` is whatever the server does; most
/// overwrite files. `copy_file`, `compress_files` and `extract_files` are
/// unsupported.
pub struct FtpFilesystem {
    manager: SessionManager<FtpProtocol>,
    staging: StagingArea,
}

impl FtpFilesystem {
    pub fn new(server: ServerModel, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            manager: SessionManager::new(FtpProtocol, server),
            staging: StagingArea::new(cache_dir),
        }
    }

    pub fn state(&self) -> SessionState {
        self.manager.state()
    }

    fn server(&self) -> &ServerModel {
        self.manager.server()
    }
}

#[async_trait]
impl Filesystem for FtpFilesystem {
    fn default_location(&self) -> FileModel {
        let server = self.server();
        FileModel::directory(server.server_type.scheme(), &server.uuid, &server.initial_dir)
    }

    async fn provide_directory(&self, parent: &FileModel) -> Result<FileTree> {
        let path = parent.path().to_string();
        let lines = self.manager.run(|session| Box::pin(list_dir(session, path))).await?;
        let entries = lines.iter().filter_map(|line| list::parse_line(line));
        Ok(FtpMapper.to_file_tree(parent, entries))
    }

    async fn exists(&self, model: &FileModel) -> Result<bool> {
        let path = model.path().to_string();
        self.manager.run(|session| Box::pin(look_up(session, path))).await
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
        if model.directory {
            self.manager
                .run(|session| Box::pin(remove_tree(session, path)))
                .await?;
        } else {
            self.manager
                .run(|session| Box::pin(remove_file(session, path)))
                .await?;
        }
        info!("deleted {}", model.file_uri);
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
impl Transfer for FtpFilesystem {
    async fn download(&self, model: &FileModel, local: &Path) -> Result<()> {
        let path = model.path().to_string();
        let local = local.to_path_buf();
        self.manager
            .run(|session| Box::pin(retrieve(session, path, local)))
            .await
    }

    async fn upload(&self, local: &Path, model: &FileModel) -> Result<()> {
        let path = model.path().to_string();
        let local = local.to_path_buf();
        self.manager
            .run(|session| Box::pin(store(session, local, path)))
            .await
    }
}

async fn list_dir(session: &mut FtpClient, path: String) -> Result<Vec<String>> {
    session.list(&path).await.map_err(|e| e.into_fs(&path))
}

async fn look_up(session: &mut FtpClient, path: String) -> Result<bool> {
    match session.cwd(&path).await {
        Ok(()) => return Ok(true),
        Err(FtpError::Rejected { .. }) => {}
        Err(e) => return Err(e.into_fs(&path)),
    }
    match session.size(&path).await {
        Ok(_) => Ok(true),
        Err(FtpError::Rejected { .. }) => Ok(false),
        Err(e) => Err(e.into_fs(&path)),
    }
}

async fn create(session: &mut FtpClient, path: String, directory: bool) -> Result<()> {
    let created = if directory {
        session.mkdir(&path).await
    } else {
        session.store(&path, &mut tokio::io::empty()).await.map(|_| ())
    };
    created.map_err(|e| e.into_fs(&path))
}

async fn rename(session: &mut FtpClient, from: String, to: String) -> Result<()> {
    session.rename(&from, &to).await.map_err(|e| e.into_fs(&from))
}

async fn remove_file(session: &mut FtpClient, path: String) -> Result<()> {
    session.delete(&path).await.map_err(|e| e.into_fs(&path))
}

/// Delete files depth-first, then the emptied directories deepest first.
async fn remove_tree(session: &mut FtpClient, root: String) -> Result<()> {
    let mut pending = vec![root];
    let mut directories = Vec::new();

    while let Some(dir) = pending.pop() {
        let lines = session.list(&dir).await.map_err(|e| e.into_fs(&dir))?;
        for entry in lines.iter().filter_map(|line| list::parse_line(line)) {
            if !is_valid_file_name(&entry.name) {
                continue;
            }
            let child = format!("{}/{}", dir.trim_end_matches('/'), entry.name);
            if entry.is_directory() {
                pending.push(child);
            } else {
                session.delete(&child).await.map_err(|e| e.into_fs(&child))?;
            }
        }
        directories.push(dir);
    }

    // Servers refuse to remove the working directory.
    if let Err(e) = session.cwd("/").await {
        warn!("failed to leave working directory: {}", e);
    }
    for dir in directories.iter().rev() {
        session.rmdir(dir).await.map_err(|e| e.into_fs(dir))?;
    }
    Ok(())
}

async fn retrieve(session: &mut FtpClient, path: String, local: PathBuf) -> Result<()> {
    let mut file = File::create(&local)
        .await
        .map_err(|e| FsError::io(&local, e))?;
    let count = session
        .retrieve(&path, &mut file)
        .await
        .map_err(|e| e.into_fs_at(&path, &local))?;
    file.flush().await.map_err(|e| FsError::io(&local, e))?;
    debug!("downloaded {} bytes from {}", count, path);
    Ok(())
}

async fn store(session: &mut FtpClient, local: PathBuf, path: String) -> Result<()> {
    let mut file = File::open(&local)
        .await
        .map_err(|e| FsError::io(&local, e))?;
    let count = session
        .store(&path, &mut file)
        .await
        .map_err(|e| e.into_fs_at(&path, &local))?;
    debug!("uploaded {} bytes to {}", count, path);
    Ok(())
}
