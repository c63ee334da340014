use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use backup_core::domain::{
    errors::DriveError,
    repositories::{
        archiver::BackupArchiver, sleeper::Sleeper, upload_session_store::UploadSessionStore,
    },
    value_objects::{
        retry_policy::RetryPolicy, staged_archive::StagedArchive, upload_session::UploadSession,
    },
};
use tracing::{error, info, warn};

use super::{
    prune_backups::{PruneBackupsResult, PruneBackupsUseCase},
    resumable_upload::{ResumableUploader, UploadReport},
};

#[derive(Debug, Clone)]
pub struct BackupCycleParams {
    pub source_dir: PathBuf,
    pub destination_folder: String,
    pub max_backups: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CycleResult {
    /// Upload left behind by an interrupted run and finished during this cycle.
    pub resumed: Option<UploadReport>,
    pub archive: Option<StagedArchive>,
    pub prune: PruneBackupsResult,
    pub upload: Option<UploadReport>,
    pub staged_removed: usize,
}

pub struct BackupCycleUseCase {
    archiver: Arc<dyn BackupArchiver + Send + Sync>,
    prune: Arc<PruneBackupsUseCase>,
    uploader: Arc<ResumableUploader>,
    session_store: Arc<dyn UploadSessionStore + Send + Sync>,
    sleeper: Arc<dyn Sleeper + Send + Sync>,
    upload_retry: RetryPolicy,
}

impl BackupCycleUseCase {
    pub fn new(
        archiver: Arc<dyn BackupArchiver + Send + Sync>,
        prune: Arc<PruneBackupsUseCase>,
        uploader: Arc<ResumableUploader>,
        session_store: Arc<dyn UploadSessionStore + Send + Sync>,
        sleeper: Arc<dyn Sleeper + Send + Sync>,
        upload_retry: RetryPolicy,
    ) -> Self {
        Self {
            archiver,
            prune,
            uploader,
            session_store,
            sleeper,
            upload_retry,
        }
    }

    /// Archive, prune, upload. Staged archives are removed whatever the outcome.
    pub async fn run_cycle(&self, params: &BackupCycleParams) -> Result<CycleResult> {
        info!(
            source = %params.source_dir.display(),
            destination = %params.destination_folder,
            max_backups = params.max_backups,
            "backup_cycle: starting"
        );

        let resumed = self.resume_pending().await;
        let outcome = self.archive_prune_upload(params).await;

        let staged_removed = match self.archiver.clear_staging().await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "backup_cycle: failed to clear staging");
                0
            }
        };

        let mut result = outcome?;
        result.resumed = resumed;
        result.staged_removed = staged_removed;

        info!(
            archive = result.archive.as_ref().map(|a| a.file_name.as_str()).unwrap_or_default(),
            pruned = result.prune.deleted,
            prune_failed = result.prune.failed,
            resumed = result.resumed.is_some(),
            staged_removed,
            "backup_cycle: completed"
        );
        Ok(result)
    }

    async fn archive_prune_upload(&self, params: &BackupCycleParams) -> Result<CycleResult> {
        let archive = self
            .archiver
            .create_archive(&params.source_dir)
            .await
            .context("failed to create backup archive")?;

        // Listing happens before the upload, so the new archive counts from the next cycle.
        let prune = self
            .prune
            .run(&params.destination_folder, params.max_backups)
            .await?;

        let upload = self
            .upload_with_retry(&archive, &params.destination_folder)
            .await?;

        Ok(CycleResult {
            archive: Some(archive),
            prune,
            upload: Some(upload),
            ..Default::default()
        })
    }

    async fn upload_with_retry(
        &self,
        archive: &StagedArchive,
        destination: &str,
    ) -> Result<UploadReport> {
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            let err = match self.uploader.upload_archive(archive, destination).await {
                Ok(report) => return Ok(report),
                Err(err) => err,
            };

            // A fresh session is opened on the next attempt.
            self.discard_session().await;

            if is_local_failure(&err) || !self.upload_retry.should_retry(attempt) {
                error!(
                    file_name = %archive.file_name,
                    attempt,
                    error = %err,
                    "backup_cycle: upload failed"
                );
                return Err(err.context(format!("failed to upload {}", archive.file_name)));
            }

            warn!(
                file_name = %archive.file_name,
                attempt,
                error = %err,
                backoff_secs = self.upload_retry.backoff().as_secs(),
                "backup_cycle: upload failed; retrying"
            );
            self.sleeper.sleep(self.upload_retry.backoff()).await;
        }
    }

    /// Finishes an upload interrupted by a crash. Any problem discards the stale session.
    async fn resume_pending(&self) -> Option<UploadReport> {
        let session = match self.session_store.load().await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "backup_cycle: failed to read persisted upload session");
                return None;
            }
        };

        if !self.local_file_matches(&session).await {
            warn!(
                file_name = %session.file_name,
                path = %session.local_path.display(),
                "backup_cycle: staged file for persisted session is gone or changed; discarding"
            );
            self.discard_session().await;
            return None;
        }

        match self.uploader.resume_persisted(session).await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "backup_cycle: failed to resume persisted upload; discarding");
                self.discard_session().await;
                None
            }
        }
    }

    async fn local_file_matches(&self, session: &UploadSession) -> bool {
        tokio::fs::metadata(&session.local_path)
            .await
            .is_ok_and(|metadata| metadata.is_file() && metadata.len() == session.total_size)
    }

    async fn discard_session(&self) {
        if let Err(err) = self.session_store.clear().await {
            warn!(error = %err, "backup_cycle: failed to clear persisted upload session");
        }
    }
}

fn is_local_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<DriveError>(),
            Some(DriveError::LocalIo { .. })
        )
    })
}
