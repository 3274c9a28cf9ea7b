use std::path::{Path, PathBuf};

use async_trait::async_trait;
use filebridge_base::{
    charset, FileModel, FileParams, FileStream, FileTree, Filesystem, FsError, Mapper, Result,
    StagingArea,
};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::archive::{self, Source};
use crate::mapper::{LocalEntry, LocalMapper};

pub const LOCAL_SCHEME: &str = "file";
pub const LOCAL_UUID: &str = "local";

/// Progress items buffered between the zip worker and the consumer.
const PROGRESS_BUFFER: usize = 16;

/// The local disk, rooted at a directory.
///
/// Collision policy: `rename_file` and `copy_file` overwrite an existing
/// destination file; renaming onto a non-empty directory fails with `Io`.
/// `create_file` fails with `Io` when the entry already exists.
pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a model onto the disk, refusing paths that climb above the root.
    fn resolve(&self, model: &FileModel) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in model.path().split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(FsError::not_found(model.path()));
            }
            path.push(segment);
        }
        Ok(path)
    }

    async fn require_parent(&self, model: &FileModel) -> Result<()> {
        let parent = match model.parent_path() {
            Some(parent) => parent,
            None => return Ok(()),
        };
        let parent_model = FileModel::new(LOCAL_SCHEME, LOCAL_UUID, parent);
        let path = self.resolve(&parent_model)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(FsError::not_found(parent)),
            Err(e) => Err(FsError::from_local(parent, e)),
        }
    }
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    fn default_location(&self) -> FileModel {
        FileModel::directory(LOCAL_SCHEME, LOCAL_UUID, "/")
    }

    async fn provide_directory(&self, parent: &FileModel) -> Result<FileTree> {
        let dir = self.resolve(parent)?;
        // A regular file has no listing, the same as a missing directory.
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(FsError::not_found(parent.path())),
            Err(e) => return Err(FsError::from_local(parent.path(), e)),
        }
        let mut read_dir = fs::read_dir(&dir)
            .await
            .map_err(|e| FsError::from_local(parent.path(), e))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| FsError::io(&dir, e))?
        {
            match fs::metadata(entry.path()).await {
                Ok(metadata) => entries.push(LocalEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    metadata,
                }),
                Err(e) => warn!("skipping {}: {}", entry.path().display(), e),
            }
        }

        // Sort: directories first, then alphabetically
        entries.sort_by(|a, b| {
            b.metadata
                .is_dir()
                .cmp(&a.metadata.is_dir())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        Ok(LocalMapper.to_file_tree(parent, entries))
    }

    async fn exists(&self, model: &FileModel) -> Result<bool> {
        let path = self.resolve(model)?;
        fs::try_exists(&path).await.map_err(|e| FsError::io(&path, e))
    }

    async fn create_file(&self, model: &FileModel) -> Result<()> {
        self.require_parent(model).await?;
        let path = self.resolve(model)?;
        let created = if model.directory {
            fs::create_dir(&path).await
        } else {
            fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
                .map(|_| ())
        };
        created.map_err(|e| FsError::io(&path, e))?;
        info!("created {}", model.path());
        Ok(())
    }

    async fn rename_file(&self, source: &FileModel, dest: &FileModel) -> Result<()> {
        let from = self.resolve(source)?;
        let to = self.resolve(dest)?;
        fs::symlink_metadata(&from)
            .await
            .map_err(|e| FsError::from_local(source.path(), e))?;
        self.require_parent(dest).await?;
        fs::rename(&from, &to)
            .await
            .map_err(|e| FsError::io(&to, e))?;
        info!("renamed {} -> {}", source.path(), dest.path());
        Ok(())
    }

    async fn delete_file(&self, model: &FileModel) -> Result<()> {
        let path = self.resolve(model)?;
        let metadata = fs::symlink_metadata(&path)
            .await
            .map_err(|e| FsError::from_local(model.path(), e))?;
        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        removed.map_err(|e| FsError::io(&path, e))?;
        info!("deleted {}", model.path());
        Ok(())
    }

    async fn copy_file(&self, source: &FileModel, dest: &FileModel) -> Result<()> {
        let from = self.resolve(source)?;
        let to = self.resolve(dest)?;
        let metadata = fs::metadata(&from)
            .await
            .map_err(|e| FsError::from_local(source.path(), e))?;
        self.require_parent(dest).await?;

        if !metadata.is_dir() {
            fs::copy(&from, &to).await.map_err(|e| FsError::io(&to, e))?;
            info!("copied {} -> {}", source.path(), dest.path());
            return Ok(());
        }

        let mut pending = vec![(from, to)];
        while let Some((src, dst)) = pending.pop() {
            match fs::create_dir(&dst).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(FsError::io(&dst, e)),
            }
            let mut read_dir = fs::read_dir(&src).await.map_err(|e| FsError::io(&src, e))?;
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| FsError::io(&src, e))?
            {
                let target = dst.join(entry.file_name());
                let file_type = entry.file_type().await.map_err(|e| FsError::io(entry.path(), e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    fs::copy(entry.path(), &target)
                        .await
                        .map_err(|e| FsError::io(&target, e))?;
                }
            }
        }
        info!("copied directory {} -> {}", source.path(), dest.path());
        Ok(())
    }

    async fn compress_files(&self, sources: &[FileModel], dest: &FileModel) -> Result<FileStream> {
        let mut jobs = Vec::with_capacity(sources.len());
        for model in sources {
            let path = self.resolve(model)?;
            if !fs::try_exists(&path).await.map_err(|e| FsError::io(&path, e))? {
                return Err(FsError::not_found(model.path()));
            }
            jobs.push(Source {
                path,
                model: model.clone(),
            });
        }
        self.require_parent(dest).await?;
        let archive = self.resolve(dest)?;

        debug!("compressing {} entries into {}", jobs.len(), dest.path());
        let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
        tokio::task::spawn_blocking(move || archive::compress(jobs, archive, tx));

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }))
    }

    async fn extract_files(&self, source: &FileModel, dest: &FileModel) -> Result<FileStream> {
        let archive = self.resolve(source)?;
        let target = self.resolve(dest)?;
        let metadata = fs::metadata(&archive)
            .await
            .map_err(|e| FsError::from_local(source.path(), e))?;
        if metadata.is_dir() {
            return Err(FsError::not_found(source.path()));
        }
        match fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(FsError::not_found(dest.path())),
            Err(e) => return Err(FsError::from_local(dest.path(), e)),
        }

        debug!("extracting {} into {}", source.path(), dest.path());
        let dest_model = FileModel {
            directory: true,
            ..dest.clone()
        };
        let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
        tokio::task::spawn_blocking(move || archive::extract(archive, target, dest_model, tx));

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }))
    }

    async fn load_file(&self, model: &FileModel, params: &FileParams) -> Result<String> {
        let path = self.resolve(model)?;
        let bytes = fs::read(&path)
            .await
            .map_err(|e| FsError::from_local(model.path(), e))?;
        Ok(charset::decode(&bytes, params))
    }

    /// Writes a sibling temporary file and renames it over the target, so
    /// readers never observe a half-written file.
    async fn save_file(&self, model: &FileModel, text: &str, params: &FileParams) -> Result<()> {
        self.require_parent(model).await?;
        let path = self.resolve(model)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());

        let staged = StagingArea::new(dir).stage().await?;
        staged.write_text(text, params).await?;
        fs::rename(staged.path(), &path)
            .await
            .map_err(|e| FsError::io(&path, e))?;
        staged.remove().await;
        debug!("saved {} ({} chars)", model.path(), text.len());
        Ok(())
    }
}
