use filebridge_base::{FileModel, Mapper, Permission};

use crate::list::FtpEntry;

pub struct FtpMapper;

impl Mapper for FtpMapper {
    type Entry = FtpEntry;

    fn name<'a>(&self, entry: &'a FtpEntry) -> &'a str {
        &entry.name
    }

    fn to_file_model(&self, parent: &FileModel, entry: &FtpEntry) -> FileModel {
        FileModel {
            size: entry.size,
            last_modified: entry
                .modified
                .map(|t| t.and_utc().timestamp_millis())
                .unwrap_or_default(),
            permission: Permission::from_fn(|class, access| entry.has_permission(class, access)),
            ..parent.child(&entry.name, entry.is_directory())
        }
    }
}
