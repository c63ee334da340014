use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::config_model::{
    Auth, Backup, DotEnvyConfig, DriveCredentials, RunMode, Schedule, Upload,
};
use anyhow::{Context, Result};
use backup_core::{
    domain::value_objects::{
        retry_policy::RetryPolicy,
        upload_session::{DEFAULT_CHUNK_SIZE_BYTES, align_chunk_size},
    },
    infra::graph::{
        drive_client::DEFAULT_GRAPH_BASE_URL, http::HttpConfig,
        token_client::DEFAULT_LOGIN_BASE_URL,
    },
};
use url::Url;

const DEFAULT_DESTINATION_FOLDER: &str = "backups";
const DEFAULT_MAX_BACKUPS: usize = 5;
const DEFAULT_INTERVAL_MINUTES: u64 = 1440;
const DEFAULT_SOURCE_DIR: &str = "/app/data";
const DEFAULT_STAGING_DIR: &str = "/app/backups";
const UPLOAD_STATE_FILE: &str = ".upload-session.json";
const DEFAULT_TOKEN_RETRY_BACKOFF_SECS: u64 = 30;
const DEFAULT_RANGE_RETRY_BACKOFF_SECS: u64 = 10;
const DEFAULT_UPLOAD_RETRY_BACKOFF_SECS: u64 = 10;

pub fn load() -> Result<DotEnvyConfig> {
    load_from(|key| std::env::var(key).ok())
}

/// Builds the config from any key lookup. Required credentials fail loudly; every optional
/// setting falls back to its default when absent or unparseable.
pub fn load_from<F>(lookup: F) -> Result<DotEnvyConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    let drive = DriveCredentials {
        client_id: env.required("CLIENT_ID")?,
        client_secret: env.required("CLIENT_SECRET")?,
        tenant_id: env.required("TENANT_ID")?,
        drive_id: env.required("DRIVE_ID")?,
        graph_base_url: env.url("GRAPH_BASE_URL", DEFAULT_GRAPH_BASE_URL)?,
        login_base_url: env.url("LOGIN_BASE_URL", DEFAULT_LOGIN_BASE_URL)?,
    };

    let staging_dir = env
        .string("BACKUP_STAGING_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR));

    let backup = Backup {
        source_dir: env
            .string("BACKUP_SOURCE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR)),
        upload_state_path: env
            .string("UPLOAD_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| staging_dir.join(UPLOAD_STATE_FILE)),
        staging_dir,
        destination_folder: env
            .string("ONEDRIVE_DESTINATION_FOLDER")
            .map(|v| v.trim_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DESTINATION_FOLDER.to_string()),
        max_backups: env.positive("MAX_BACKUPS").unwrap_or(DEFAULT_MAX_BACKUPS),
    };

    let chunk_size_mb: u64 = env.positive("UPLOAD_CHUNK_SIZE_MB").unwrap_or(0);
    let chunk_size_bytes = chunk_size_mb
        .checked_mul(1024 * 1024)
        .filter(|bytes| *bytes > 0)
        .map(align_chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE_BYTES);

    let range_backoff = env.secs("RANGE_RETRY_BACKOFF_SECS", DEFAULT_RANGE_RETRY_BACKOFF_SECS);
    let range_retry = match env.positive::<u32>("RANGE_MAX_ATTEMPTS") {
        Some(max_attempts) => RetryPolicy::bounded(max_attempts, range_backoff),
        None => RetryPolicy::forever(range_backoff),
    };

    let upload = Upload {
        chunk_size_bytes,
        range_retry,
        step_retry_backoff: env.secs("UPLOAD_RETRY_BACKOFF_SECS", DEFAULT_UPLOAD_RETRY_BACKOFF_SECS),
    };

    let auth = Auth {
        token_retry: RetryPolicy::forever(
            env.secs("TOKEN_RETRY_BACKOFF_SECS", DEFAULT_TOKEN_RETRY_BACKOFF_SECS),
        ),
    };

    let http_defaults = HttpConfig::default();
    let http = HttpConfig {
        connect_timeout_secs: env
            .positive("HTTP_CONNECT_TIMEOUT_SECS")
            .unwrap_or(http_defaults.connect_timeout_secs),
        request_timeout_secs: env
            .positive("HTTP_REQUEST_TIMEOUT_SECS")
            .unwrap_or(http_defaults.request_timeout_secs),
    };

    let run_mode = match env.string("RUN_MODE").map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("once") | Some("single") | Some("oneshot") => RunMode::Once,
        _ => RunMode::Loop,
    };
    let interval_minutes = env
        .positive("BACKUP_INTERVAL_MINUTES")
        .unwrap_or(DEFAULT_INTERVAL_MINUTES);
    let schedule = Schedule {
        run_mode,
        interval: Duration::from_secs(interval_minutes.saturating_mul(60)),
    };

    Ok(DotEnvyConfig {
        drive,
        backup,
        upload,
        auth,
        http,
        schedule,
    })
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.string(key).with_context(|| format!("{key} is invalid"))
    }

    fn positive<T>(&self, key: &str) -> Option<T>
    where
        T: FromStr + PartialOrd + Default,
    {
        self.string(key)
            .and_then(|v| v.parse::<T>().ok())
            .filter(|v| *v > T::default())
    }

    fn secs(&self, key: &str, default: u64) -> Duration {
        let secs = self
            .string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default);
        Duration::from_secs(secs)
    }

    fn url(&self, key: &str, default: &str) -> Result<Url> {
        let raw = self.string(key).unwrap_or_else(|| default.to_string());
        Url::parse(&raw).with_context(|| format!("{key} is invalid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("CLIENT_ID", "client-id"),
            ("CLIENT_SECRET", "client-secret"),
            ("TENANT_ID", "tenant-id"),
            ("DRIVE_ID", "drive-id"),
        ])
    }

    fn load_with(vars: HashMap<&'static str, &'static str>) -> Result<DotEnvyConfig> {
        load_from(move |key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_optional_values_absent() {
        let config = load_with(base_vars()).expect("config should load");

        assert_eq!(config.backup.destination_folder, "backups");
        assert_eq!(config.backup.max_backups, 5);
        assert_eq!(config.backup.source_dir, PathBuf::from("/app/data"));
        assert_eq!(
            config.backup.upload_state_path,
            PathBuf::from("/app/backups/.upload-session.json")
        );
        assert_eq!(config.schedule.interval, Duration::from_secs(1440 * 60));
        assert_eq!(config.schedule.run_mode, RunMode::Loop);
        assert_eq!(config.upload.chunk_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.upload.range_retry.max_attempts(), None);
        assert_eq!(config.upload.range_retry.backoff(), Duration::from_secs(10));
        assert_eq!(config.auth.token_retry.backoff(), Duration::from_secs(30));
        assert_eq!(config.http.connect_timeout_secs, 10);
        assert_eq!(
            config.drive.graph_base_url.as_str(),
            "https://graph.microsoft.com/v1.0"
        );
    }

    #[test]
    fn invalid_optional_values_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("MAX_BACKUPS", "-3");
        vars.insert("BACKUP_INTERVAL_MINUTES", "often");
        vars.insert("UPLOAD_CHUNK_SIZE_MB", "0");
        vars.insert("RANGE_MAX_ATTEMPTS", "nope");
        vars.insert("ONEDRIVE_DESTINATION_FOLDER", "   ");

        let config = load_with(vars).expect("config should load");

        assert_eq!(config.backup.max_backups, 5);
        assert_eq!(config.schedule.interval, Duration::from_secs(1440 * 60));
        assert_eq!(config.upload.chunk_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.upload.range_retry.max_attempts(), None);
        assert_eq!(config.backup.destination_folder, "backups");
    }

    #[test]
    fn explicit_values_are_used() {
        let mut vars = base_vars();
        vars.insert("MAX_BACKUPS", "9");
        vars.insert("BACKUP_INTERVAL_MINUTES", "60");
        vars.insert("ONEDRIVE_DESTINATION_FOLDER", "/servers/nightly/");
        vars.insert("RUN_MODE", "ONCE");
        vars.insert("UPLOAD_CHUNK_SIZE_MB", "5");
        vars.insert("RANGE_MAX_ATTEMPTS", "4");
        vars.insert("UPLOAD_STATE_PATH", "/var/lib/backup/state.json");

        let config = load_with(vars).expect("config should load");

        assert_eq!(config.backup.max_backups, 9);
        assert_eq!(config.schedule.interval, Duration::from_secs(3600));
        assert_eq!(config.backup.destination_folder, "servers/nightly");
        assert_eq!(config.schedule.run_mode, RunMode::Once);
        assert_eq!(config.upload.chunk_size_bytes, 5 * 1024 * 1024);
        assert_eq!(config.upload.range_retry.max_attempts(), Some(4));
        assert_eq!(
            config.backup.upload_state_path,
            PathBuf::from("/var/lib/backup/state.json")
        );
    }

    #[test]
    fn chunk_size_is_aligned_to_upload_granularity() {
        let mut vars = base_vars();
        vars.insert("UPLOAD_CHUNK_SIZE_MB", "1");

        let config = load_with(vars).expect("config should load");
        assert_eq!(config.upload.chunk_size_bytes, 3 * 320 * 1024);
    }

    #[test]
    fn missing_credentials_fail() {
        let mut vars = base_vars();
        vars.remove("CLIENT_SECRET");

        let err = load_with(vars).expect_err("secret is required");
        assert!(err.to_string().contains("CLIENT_SECRET"));
    }

    #[test]
    fn step_retry_depends_on_run_mode() {
        let config = load_with(base_vars()).expect("config should load");
        assert_eq!(config.upload.step_retry(RunMode::Loop).max_attempts(), None);
        assert_eq!(config.upload.step_retry(RunMode::Once).max_attempts(), Some(1));
    }

    #[test]
    fn debug_output_hides_client_secret() {
        let config = load_with(base_vars()).expect("config should load");
        let rendered = format!("{:?}", config.drive);
        assert!(!rendered.contains("client-secret"));
    }
}
