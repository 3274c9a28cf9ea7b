use filebridge_base::{FileModel, Mapper, Permission};

use crate::multistatus::DavEntry;

pub struct DavMapper;

impl Mapper for DavMapper {
    type Entry = DavEntry;

    fn name<'a>(&self, entry: &'a DavEntry) -> &'a str {
        entry.name()
    }

    fn to_file_model(&self, parent: &FileModel, entry: &DavEntry) -> FileModel {
        // Servers without ACL support report no privileges.
        let (read, write) = entry.privileges.unwrap_or((false, false));
        let mut permission = Permission::EMPTY;
        if read {
            permission |= Permission::OWNER_READ;
        }
        if write {
            permission |= Permission::OWNER_WRITE;
        }

        FileModel {
            size: entry.content_length,
            last_modified: entry.last_modified.unwrap_or_default(),
            permission,
            ..parent.child(entry.name(), entry.collection)
        }
    }
}
