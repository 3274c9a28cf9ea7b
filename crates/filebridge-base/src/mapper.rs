use crate::model::{is_valid_file_name, FileModel, FileTree};

/// Converts a backend's native directory entry into a [`FileModel`].
///
/// The directory being listed is passed to every call, so one mapper can
/// serve concurrent listings.
pub trait Mapper {
    type Entry;

    /// Native name of the entry, as the backend reports it.
    fn name<'a>(&self, entry: &'a Self::Entry) -> &'a str;

    fn to_file_model(&self, parent: &FileModel, entry: &Self::Entry) -> FileModel;

    /// Map a whole listing, dropping entries whose name is not valid.
    fn to_file_tree<I>(&self, parent: &FileModel, entries: I) -> FileTree
    where
        I: IntoIterator<Item = Self::Entry>,
        Self: Sized,
    {
        let children = entries
            .into_iter()
            .filter(|entry| is_valid_file_name(self.name(entry)))
            .map(|entry| self.to_file_model(parent, &entry))
            .collect();
        FileTree {
            parent: parent.clone(),
            children,
        }
    }
}
