use async_trait::async_trait;
use mockall::automock;

use crate::domain::{errors::DriveError, value_objects::bearer_token::BearerToken};

#[async_trait]
#[automock]
pub trait TokenProvider {
    /// Performs a single credential exchange; retrying is the caller's decision.
    async fn exchange(&self) -> Result<BearerToken, DriveError>;
}
