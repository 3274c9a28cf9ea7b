use filebridge_base::{FileModel, Mapper, Permission};

/// A directory entry as reported by `SSH_FXP_READDIR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpEntry {
    pub name: String,
    pub size: u64,
    /// POSIX mode bits, including the file type.
    pub mode: u32,
    /// Seconds since the Unix epoch.
    pub mtime: u32,
    pub directory: bool,
}

pub struct SftpMapper;

impl Mapper for SftpMapper {
    type Entry = SftpEntry;

    fn name<'a>(&self, entry: &'a SftpEntry) -> &'a str {
        &entry.name
    }

    fn to_file_model(&self, parent: &FileModel, entry: &SftpEntry) -> FileModel {
        FileModel {
            size: entry.size,
            last_modified: i64::from(entry.mtime) * 1000,
            permission: Permission::from_mode(entry.mode),
            ..parent.child(&entry.name, entry.directory)
        }
    }
}
