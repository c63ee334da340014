use serde::{Deserialize, Serialize};

/// One child item of the remote backup folder, as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    /// Raw `lastModifiedDateTime`; parsed lazily by the retention policy.
    #[serde(rename = "lastModifiedDateTime", default)]
    pub last_modified: String,
}

impl RemoteEntry {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        last_modified: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            last_modified: last_modified.into(),
        }
    }
}
