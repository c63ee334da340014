use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::value_objects::staged_archive::StagedArchive;

#[async_trait]
#[automock]
pub trait BackupArchiver {
    async fn create_archive(&self, source_dir: &Path) -> Result<StagedArchive>;

    /// Removes every staged archive and returns how many were deleted.
    async fn clear_staging(&self) -> Result<usize>;
}
