use async_trait::async_trait;
use mockall::automock;

use crate::domain::{errors::DriveError, value_objects::folder_listing::FolderListing};

#[async_trait]
#[automock]
pub trait RemoteDirectory {
    /// Creates `folder` with rename-on-conflict, so calling it for an existing folder never fails.
    async fn ensure_folder(&self, folder: &str) -> Result<(), DriveError>;

    async fn list(&self, folder: &str) -> Result<FolderListing, DriveError>;

    async fn delete(&self, entry_id: &str) -> Result<(), DriveError>;
}
