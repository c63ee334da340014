use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Upper bound for a whole request, body transfer included.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

pub fn build_http_client(config: &HttpConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(concat!("drive-backup/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build http client")
}
