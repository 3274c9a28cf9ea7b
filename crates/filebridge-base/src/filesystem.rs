use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::{FsError, Result};
use crate::model::{FileModel, FileParams, FileTree};

/// Progress of an archive operation: one item per entry written.
///
/// The stream is finite and cannot be restarted. Dropping it before the end
/// cancels the operation.
pub type FileStream = BoxStream<'static, Result<FileModel>>;

/// The capability set every storage backend exposes.
///
/// Callers hold a `Box<dyn Filesystem>` and never see the concrete adapter.
/// Dropping a returned future cancels the operation; adapters release their
/// sessions and staged files on that path too.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Root entry of this filesystem instance.
    fn default_location(&self) -> FileModel;

    /// List one directory level.
    async fn provide_directory(&self, parent: &FileModel) -> Result<FileTree>;

    async fn exists(&self, model: &FileModel) -> Result<bool>;

    /// Create an empty file, or a directory when `model.directory` is set.
    async fn create_file(&self, model: &FileModel) -> Result<()>;

    async fn rename_file(&self, source: &FileModel, dest: &FileModel) -> Result<()>;

    /// Delete a file, or a directory with everything below it.
    async fn delete_file(&self, model: &FileModel) -> Result<()>;

    async fn copy_file(&self, _source: &FileModel, _dest: &FileModel) -> Result<()> {
        Err(FsError::Unsupported("copy"))
    }

    async fn compress_files(&self, _sources: &[FileModel], _dest: &FileModel) -> Result<FileStream> {
        Err(FsError::Unsupported("compress"))
    }

    async fn extract_files(&self, _source: &FileModel, _dest: &FileModel) -> Result<FileStream> {
        Err(FsError::Unsupported("extract"))
    }

    /// Read the whole file as text.
    async fn load_file(&self, model: &FileModel, params: &FileParams) -> Result<String>;

    /// Replace the whole file with `text`.
    async fn save_file(&self, model: &FileModel, text: &str, params: &FileParams) -> Result<()>;
}
