use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use crate::domain::{
    repositories::upload_session_store::UploadSessionStore,
    value_objects::upload_session::UploadSession,
};

/// Persists the in-flight upload session as a small JSON document.
///
/// Writes go to a sibling temp file that is renamed over the target, so a crash mid-write
/// leaves either the previous state or the new one.
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "upload-session.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl UploadSessionStore for JsonFileSessionStore {
    async fn load(&self) -> Result<Option<UploadSession>> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };

        match serde_json::from_slice::<UploadSession>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                // A corrupt state file only costs a resume; never block new backups on it.
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "session_store: discarding unreadable upload state"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &UploadSession) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let encoded = serde_json::to_vec_pretty(session).context("failed to encode upload state")?;
        let temp = self.temp_path();
        fs::write(&temp, encoded)
            .await
            .with_context(|| format!("failed to write {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", self.path.display())),
        }
    }
}
