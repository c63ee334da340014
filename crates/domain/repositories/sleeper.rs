use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;

/// Backoff pauses go through this so retry loops can be driven without real waiting.
#[async_trait]
#[automock]
pub trait Sleeper {
    async fn sleep(&self, duration: Duration);
}
