use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::value_objects::upload_session::UploadSession;

#[async_trait]
#[automock]
pub trait UploadSessionStore {
    async fn load(&self) -> Result<Option<UploadSession>>;

    async fn save(&self, session: &UploadSession) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}
