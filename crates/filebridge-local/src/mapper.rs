use std::fs::Metadata;
use std::time::UNIX_EPOCH;

use filebridge_base::{FileModel, Mapper, Permission};

/// A directory entry read from the local disk.
pub struct LocalEntry {
    pub name: String,
    pub metadata: Metadata,
}

pub struct LocalMapper;

impl Mapper for LocalMapper {
    type Entry = LocalEntry;

    fn name<'a>(&self, entry: &'a LocalEntry) -> &'a str {
        &entry.name
    }

    fn to_file_model(&self, parent: &FileModel, entry: &LocalEntry) -> FileModel {
        FileModel {
            size: entry.metadata.len(),
            last_modified: last_modified(&entry.metadata),
            permission: permission(&entry.metadata),
            ..parent.child(&entry.name, entry.metadata.is_dir())
        }
    }
}

/// Fill in metadata for an existing model.
pub fn with_metadata(model: FileModel, metadata: &Metadata) -> FileModel {
    FileModel {
        size: metadata.len(),
        last_modified: last_modified(metadata),
        directory: metadata.is_dir(),
        permission: permission(metadata),
        ..model
    }
}

fn last_modified(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(unix)]
fn permission(metadata: &Metadata) -> Permission {
    use std::os::unix::fs::PermissionsExt;

    Permission::from_mode(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn permission(metadata: &Metadata) -> Permission {
    let mut permission = Permission::OWNER_READ | Permission::GROUP_READ | Permission::OTHERS_READ;
    if !metadata.permissions().readonly() {
        permission |= Permission::OWNER_WRITE;
    }
    if metadata.is_dir() {
        permission |= Permission::OWNER_EXECUTE;
    }
    permission
}
