//! Zip compress/extract running on the blocking pool.
//!
//! Progress is reported through a bounded channel. A failed send means the
//! consumer dropped the stream, and the worker stops and removes what it
//! wrote.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use filebridge_base::{FileModel, FsError, Mapper, Result};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::mapper::{with_metadata, LocalEntry, LocalMapper};

/// A local path together with the model reported for it.
pub struct Source {
    pub path: PathBuf,
    pub model: FileModel,
}

enum Abort {
    Cancelled,
    Failed(FsError),
}

impl From<FsError> for Abort {
    fn from(e: FsError) -> Self {
        Abort::Failed(e)
    }
}

fn zip_error(path: &Path, e: zip::result::ZipError) -> FsError {
    FsError::io(path, io::Error::new(io::ErrorKind::Other, e))
}

fn report(tx: &Sender<Result<FileModel>>, model: FileModel) -> std::result::Result<(), Abort> {
    tx.blocking_send(Ok(model)).map_err(|_| Abort::Cancelled)
}

/// Pack `sources` into a new zip file at `archive`.
pub fn compress(sources: Vec<Source>, archive: PathBuf, tx: Sender<Result<FileModel>>) {
    match write_archive(&sources, &archive, &tx) {
        Ok(count) => info!("compressed {} entries into {}", count, archive.display()),
        Err(abort) => {
            if let Err(e) = fs::remove_file(&archive) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("failed to remove partial archive {}: {}", archive.display(), e);
                }
            }
            if let Abort::Failed(e) = abort {
                warn!("compress into {} failed: {}", archive.display(), e);
                let _ = tx.blocking_send(Err(e));
            } else {
                debug!("compress into {} cancelled", archive.display());
            }
        }
    }
}

fn write_archive(
    sources: &[Source],
    archive: &Path,
    tx: &Sender<Result<FileModel>>,
) -> std::result::Result<usize, Abort> {
    let file = File::create(archive).map_err(|e| FsError::from_local(archive, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut count = 0;

    for source in sources {
        let name = source.model.name().to_string();
        count += add_entry(&mut zip, options, &source.path, &name, source.model.clone(), tx)?;
    }

    zip.finish().map_err(|e| zip_error(archive, e))?;
    Ok(count)
}

fn add_entry(
    zip: &mut ZipWriter<File>,
    options: SimpleFileOptions,
    path: &Path,
    name: &str,
    model: FileModel,
    tx: &Sender<Result<FileModel>>,
) -> std::result::Result<usize, Abort> {
    let metadata = fs::metadata(path).map_err(|e| FsError::from_local(path, e))?;
    let model = with_metadata(model, &metadata);

    if !metadata.is_dir() {
        zip.start_file(name, options)
            .map_err(|e| zip_error(path, e))?;
        let mut input = File::open(path).map_err(|e| FsError::from_local(path, e))?;
        io::copy(&mut input, zip).map_err(|e| FsError::io(path, e))?;
        report(tx, model)?;
        return Ok(1);
    }

    zip.add_directory(format!("{}/", name), options)
        .map_err(|e| zip_error(path, e))?;
    report(tx, model.clone())?;
    let mut count = 1;

    let mut children = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| FsError::from_local(path, e))? {
        let entry = entry.map_err(|e| FsError::io(path, e))?;
        children.push(entry.path());
    }
    children.sort();

    for child in children {
        let child_name = child
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let child_metadata = fs::metadata(&child).map_err(|e| FsError::from_local(&child, e))?;
        let child_model = LocalMapper.to_file_model(
            &model,
            &LocalEntry {
                name: child_name.clone(),
                metadata: child_metadata,
            },
        );
        let entry_name = format!("{}/{}", name, child_name);
        count += add_entry(zip, options, &child, &entry_name, child_model, tx)?;
    }
    Ok(count)
}

/// Unpack the zip file at `archive` into the directory `dest`.
///
/// A file entry whose target already exists fails the extract with
/// `AlreadyExists`; existing directories are merged into.
pub fn extract(archive: PathBuf, dest: PathBuf, dest_model: FileModel, tx: Sender<Result<FileModel>>) {
    let mut created = Vec::new();
    match read_archive(&archive, &dest, &dest_model, &tx, &mut created) {
        Ok(count) => info!("extracted {} entries from {}", count, archive.display()),
        Err(abort) => {
            // Undo in reverse so files go before their directories.
            for path in created.iter().rev() {
                let removed = if path.is_dir() {
                    fs::remove_dir(path)
                } else {
                    fs::remove_file(path)
                };
                if let Err(e) = removed {
                    warn!("failed to remove extracted {}: {}", path.display(), e);
                }
            }
            if let Abort::Failed(e) = abort {
                warn!("extract of {} failed: {}", archive.display(), e);
                let _ = tx.blocking_send(Err(e));
            } else {
                debug!("extract of {} cancelled", archive.display());
            }
        }
    }
}

fn read_archive(
    archive: &Path,
    dest: &Path,
    dest_model: &FileModel,
    tx: &Sender<Result<FileModel>>,
    created: &mut Vec<PathBuf>,
) -> std::result::Result<usize, Abort> {
    let file = File::open(archive).map_err(|e| FsError::from_local(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| zip_error(archive, e))?;
        let relative = match entry.enclosed_name() {
            Some(relative) => relative,
            None => {
                warn!("skipping unsafe archive entry {:?}", entry.name());
                continue;
            }
        };
        let target = dest.join(&relative);

        if entry.is_dir() {
            create_dirs(dest, &target, created)?;
        } else {
            if let Some(parent) = target.parent() {
                create_dirs(dest, parent, created)?;
            }
            // Existing files are never overwritten, so cleanup only ever
            // removes what this extract wrote.
            let mut output = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .map_err(|e| FsError::from_local(&target, e))?;
            created.push(target.clone());
            io::copy(&mut entry, &mut output).map_err(|e| FsError::io(&target, e))?;
        }

        let mut model = dest_model.clone();
        for component in relative.components() {
            let name = component.as_os_str().to_string_lossy();
            model = model.child(&name, true);
        }
        let metadata = fs::metadata(&target).map_err(|e| FsError::from_local(&target, e))?;
        report(tx, with_metadata(model, &metadata))?;
    }
    Ok(zip.len())
}

/// Create `dir` and any missing ancestors below `root`, recording each new one.
fn create_dirs(root: &Path, dir: &Path, created: &mut Vec<PathBuf>) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path == root || path.exists() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }
    for path in missing.into_iter().rev() {
        fs::create_dir(&path).map_err(|e| FsError::from_local(&path, e))?;
        created.push(path);
    }
    Ok(())
}
