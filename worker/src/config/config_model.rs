use std::path::PathBuf;
use std::time::Duration;

use backup_core::{domain::value_objects::retry_policy::RetryPolicy, infra::graph::http::HttpConfig};
use url::Url;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub drive: DriveCredentials,
    pub backup: Backup,
    pub upload: Upload,
    pub auth: Auth,
    pub http: HttpConfig,
    pub schedule: Schedule,
}

#[derive(Clone)]
pub struct DriveCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub drive_id: String,
    pub graph_base_url: Url,
    pub login_base_url: Url,
}

impl std::fmt::Debug for DriveCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("drive_id", &self.drive_id)
            .field("graph_base_url", &self.graph_base_url.as_str())
            .field("login_base_url", &self.login_base_url.as_str())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Backup {
    pub source_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub destination_folder: String,
    pub max_backups: usize,
    pub upload_state_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub chunk_size_bytes: u64,
    pub range_retry: RetryPolicy,
    /// Pause between whole-upload attempts in continuous mode.
    pub step_retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct Auth {
    pub token_retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run a cycle, sleep the interval, repeat until the process is terminated.
    Loop,
    /// Run a single cycle and exit non-zero if it failed.
    Once,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    pub run_mode: RunMode,
    pub interval: Duration,
}

impl Upload {
    /// Continuous mode retries a failed upload step forever; single-shot fails the cycle.
    pub fn step_retry(&self, run_mode: RunMode) -> RetryPolicy {
        match run_mode {
            RunMode::Loop => RetryPolicy::forever(self.step_retry_backoff),
            RunMode::Once => RetryPolicy::once(),
        }
    }
}
