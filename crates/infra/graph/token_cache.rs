use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{
    errors::DriveError,
    repositories::{sleeper::Sleeper, token_provider::TokenProvider},
    value_objects::{bearer_token::BearerToken, retry_policy::RetryPolicy},
};

/// Owns the current bearer token and replaces it wholesale on refresh.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider + Send + Sync>,
    sleeper: Arc<dyn Sleeper + Send + Sync>,
    retry: RetryPolicy,
    current: Mutex<Option<BearerToken>>,
}

impl TokenCache {
    pub fn new(
        provider: Arc<dyn TokenProvider + Send + Sync>,
        sleeper: Arc<dyn Sleeper + Send + Sync>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            sleeper,
            retry,
            current: Mutex::new(None),
        }
    }

    /// Returns the cached token, acquiring a new one when none is held or it is about to expire.
    pub async fn bearer(&self) -> Result<BearerToken, DriveError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref().filter(|t| !t.is_expired_at(Utc::now())) {
            return Ok(token.clone());
        }

        let token = self.acquire().await?;
        *current = Some(token.clone());
        Ok(token)
    }

    /// Drops the held token and acquires a fresh one.
    pub async fn refresh(&self) -> Result<BearerToken, DriveError> {
        let mut current = self.current.lock().await;
        *current = None;

        let token = self.acquire().await?;
        *current = Some(token.clone());
        Ok(token)
    }

    async fn acquire(&self) -> Result<BearerToken, DriveError> {
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            match self.provider.exchange().await {
                Ok(token) => {
                    info!(attempt, expires_at = ?token.expires_at(), "token: acquired bearer token");
                    return Ok(token);
                }
                Err(err) if self.retry.should_retry(attempt) => {
                    warn!(
                        attempt,
                        error = %err,
                        backoff_secs = self.retry.backoff().as_secs(),
                        "token: credential exchange failed; retrying"
                    );
                    self.sleeper.sleep(self.retry.backoff()).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
