//! Temporary files bridging stream-oriented transfers and in-memory text.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::charset;
use crate::error::{FsError, Result};
use crate::model::{FileModel, FileParams};

/// Raw byte transfer between a backend and a local file.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Copy the backend file `model` into the existing local file `local`.
    async fn download(&self, model: &FileModel, local: &Path) -> Result<()>;

    /// Replace the backend file `model` with the contents of `local`.
    async fn upload(&self, local: &Path, model: &FileModel) -> Result<()>;
}

/// Directory holding staged files.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create an empty, uniquely named file in the staging directory.
    pub async fn stage(&self) -> Result<StagedFile> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| FsError::io(&self.dir, e))?;

        let path = self.dir.join(Uuid::new_v4().to_string());
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| FsError::io(&path, e))?;

        debug!("staged {}", path.display());
        Ok(StagedFile {
            path,
            removed: false,
        })
    }

    /// Download `model` through a staged file and decode it.
    pub async fn load<T>(&self, transfer: &T, model: &FileModel, params: &FileParams) -> Result<String>
    where
        T: Transfer + ?Sized,
    {
        let staged = self.stage().await?;
        transfer.download(model, staged.path()).await?;
        let text = staged.read_text(params).await?;
        staged.remove().await;
        Ok(text)
    }

    /// Encode `text` into a staged file and upload it as `model`.
    pub async fn save<T>(
        &self,
        transfer: &T,
        model: &FileModel,
        text: &str,
        params: &FileParams,
    ) -> Result<()>
    where
        T: Transfer + ?Sized,
    {
        let staged = self.stage().await?;
        staged.write_text(text, params).await?;
        transfer.upload(staged.path(), model).await?;
        staged.remove().await;
        Ok(())
    }

    /// Copy `source` to `dest` by downloading and re-uploading the bytes.
    ///
    /// For backends without a server-side copy primitive.
    pub async fn copy_through<T>(&self, transfer: &T, source: &FileModel, dest: &FileModel) -> Result<()>
    where
        T: Transfer + ?Sized,
    {
        let staged = self.stage().await?;
        transfer.download(source, staged.path()).await?;
        transfer.upload(staged.path(), dest).await?;
        staged.remove().await;
        Ok(())
    }
}

/// A staged file that is deleted when dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    removed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_text(&self, params: &FileParams) -> Result<String> {
        let bytes = fs::read(&self.path)
            .await
            .map_err(|e| FsError::io(&self.path, e))?;
        Ok(charset::decode(&bytes, params))
    }

    pub async fn write_text(&self, text: &str, params: &FileParams) -> Result<()> {
        let bytes = charset::encode(text, params).map_err(|e| FsError::io(&self.path, e))?;
        fs::write(&self.path, bytes)
            .await
            .map_err(|e| FsError::io(&self.path, e))
    }

    /// Delete the file now instead of on drop.
    pub async fn remove(mut self) {
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove staged file {}: {}", self.path.display(), e),
        }
        self.removed = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("discarded staged file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove staged file {}: {}", self.path.display(), e),
        }
    }
}
