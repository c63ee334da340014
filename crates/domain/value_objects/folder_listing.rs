use crate::domain::entities::remote_entries::RemoteEntry;

/// Outcome of listing a remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderListing {
    Found(Vec<RemoteEntry>),
    Absent,
}

impl FolderListing {
    pub fn into_entries(self) -> Option<Vec<RemoteEntry>> {
        match self {
            Self::Found(entries) => Some(entries),
            Self::Absent => None,
        }
    }
}
