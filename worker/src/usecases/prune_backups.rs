use std::sync::Arc;

use anyhow::{Context, Result};
use backup_core::domain::{
    entities::remote_entries::RemoteEntry,
    errors::DriveError,
    repositories::remote_directory::RemoteDirectory,
    value_objects::{folder_listing::FolderListing, retention::select_for_deletion},
};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneBackupsResult {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
    pub deleted_names: Vec<String>,
    pub failed_names: Vec<String>,
}

pub struct PruneBackupsUseCase {
    directory: Arc<dyn RemoteDirectory + Send + Sync>,
}

impl PruneBackupsUseCase {
    pub fn new(directory: Arc<dyn RemoteDirectory + Send + Sync>) -> Self {
        Self { directory }
    }

    /// Lists `folder`, creating it once when it does not exist yet.
    pub async fn list_or_create(&self, folder: &str) -> Result<Vec<RemoteEntry>, DriveError> {
        if let FolderListing::Found(entries) = self.directory.list(folder).await? {
            return Ok(entries);
        }

        info!(folder = %folder, "prune_backups: destination folder missing; creating it");
        self.directory.ensure_folder(folder).await?;

        self.directory
            .list(folder)
            .await?
            .into_entries()
            .ok_or_else(|| DriveError::NotFound(format!("{folder} is still absent after creation")))
    }

    pub async fn run(&self, folder: &str, max_backups: usize) -> Result<PruneBackupsResult> {
        let entries = self
            .list_or_create(folder)
            .await
            .with_context(|| format!("failed to list backups in {folder}"))?;

        let mut result = PruneBackupsResult {
            scanned: entries.len(),
            ..Default::default()
        };

        let decision = select_for_deletion(entries, max_backups);
        if decision.victims.is_empty() {
            info!(
                folder = %folder,
                scanned = result.scanned,
                max_backups,
                "prune_backups: nothing to prune"
            );
            return Ok(result);
        }

        for victim in decision.victims {
            match self.directory.delete(&victim.id).await {
                Ok(()) => {
                    info!(
                        entry_id = %victim.id,
                        name = %victim.name,
                        last_modified = %victim.last_modified,
                        "prune_backups: deleted old backup"
                    );
                    result.deleted += 1;
                    result.deleted_names.push(victim.name);
                }
                Err(err) => {
                    error!(
                        entry_id = %victim.id,
                        name = %victim.name,
                        error = %err,
                        "prune_backups: failed to delete old backup; continuing"
                    );
                    result.failed += 1;
                    result.failed_names.push(victim.name);
                }
            }
        }

        if result.failed > 0 {
            warn!(
                folder = %folder,
                failed = result.failed,
                "prune_backups: some backups could not be deleted; next cycle will retry"
            );
        }

        info!(
            folder = %folder,
            scanned = result.scanned,
            deleted = result.deleted,
            failed = result.failed,
            max_backups,
            "prune_backups: completed"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::domain::repositories::remote_directory::MockRemoteDirectory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(id: &str, last_modified: &str) -> RemoteEntry {
        RemoteEntry::new(id, format!("backup-{id}.zip"), last_modified)
    }

    fn seven_backups() -> Vec<RemoteEntry> {
        vec![
            entry("t3", "2024-01-03T00:00:00Z"),
            entry("t7", "2024-01-07T00:00:00Z"),
            entry("t1", "2024-01-01T00:00:00Z"),
            entry("t5", "2024-01-05T00:00:00Z"),
            entry("t2", "2024-01-02T00:00:00Z"),
            entry("t6", "2024-01-06T00:00:00Z"),
            entry("t4", "2024-01-04T00:00:00Z"),
        ]
    }

    #[tokio::test]
    async fn deletes_oldest_beyond_cap() {
        let mut directory = MockRemoteDirectory::new();
        directory
            .expect_list()
            .withf(|folder| folder == "backups")
            .times(1)
            .returning(|_| Box::pin(async { Ok(FolderListing::Found(seven_backups())) }));
        directory.expect_ensure_folder().never();
        directory
            .expect_delete()
            .withf(|id| id == "t1" || id == "t2")
            .times(2)
            .returning(|_| Box::pin(async { Ok(()) }));

        let usecase = PruneBackupsUseCase::new(Arc::new(directory));
        let result = usecase.run("backups", 5).await.expect("prune");

        assert_eq!(result.scanned, 7);
        assert_eq!(result.deleted, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(result.deleted_names, vec!["backup-t1.zip", "backup-t2.zip"]);
    }

    #[tokio::test]
    async fn delete_failure_is_counted_and_pass_continues() {
        let mut directory = MockRemoteDirectory::new();
        directory
            .expect_list()
            .returning(|_| Box::pin(async { Ok(FolderListing::Found(seven_backups())) }));
        directory.expect_delete().times(2).returning(|id| {
            let id = id.to_string();
            Box::pin(async move {
                if id == "t1" {
                    Err(DriveError::remote(423, "locked"))
                } else {
                    Ok(())
                }
            })
        });

        let usecase = PruneBackupsUseCase::new(Arc::new(directory));
        let result = usecase.run("backups", 5).await.expect("prune");

        assert_eq!(result.deleted, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failed_names, vec!["backup-t1.zip"]);
        assert_eq!(result.deleted_names, vec!["backup-t2.zip"]);
    }

    #[tokio::test]
    async fn under_cap_deletes_nothing() {
        let mut directory = MockRemoteDirectory::new();
        directory.expect_list().returning(|_| {
            Box::pin(async { Ok(FolderListing::Found(vec![entry("a", "2024-01-01T00:00:00Z")])) })
        });
        directory.expect_delete().never();

        let usecase = PruneBackupsUseCase::new(Arc::new(directory));
        let result = usecase.run("backups", 5).await.expect("prune");

        assert_eq!(result.scanned, 1);
        assert_eq!(result.deleted, 0);
    }

    #[tokio::test]
    async fn absent_folder_is_created_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut directory = MockRemoteDirectory::new();
        directory.expect_list().times(2).returning(move |_| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if call == 0 {
                    Ok(FolderListing::Absent)
                } else {
                    Ok(FolderListing::Found(Vec::new()))
                }
            })
        });
        directory
            .expect_ensure_folder()
            .withf(|folder| folder == "backups")
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        let usecase = PruneBackupsUseCase::new(Arc::new(directory));
        let entries = usecase.list_or_create("backups").await.expect("listing");

        assert!(entries.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_absence_is_not_found() {
        let mut directory = MockRemoteDirectory::new();
        directory
            .expect_list()
            .times(2)
            .returning(|_| Box::pin(async { Ok(FolderListing::Absent) }));
        directory
            .expect_ensure_folder()
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        let usecase = PruneBackupsUseCase::new(Arc::new(directory));
        let err = usecase.list_or_create("backups").await.expect_err("absent twice");

        assert!(matches!(err, DriveError::NotFound(_)));
    }

    #[tokio::test]
    async fn listing_failure_fails_the_pass() {
        let mut directory = MockRemoteDirectory::new();
        directory
            .expect_list()
            .returning(|_| Box::pin(async { Err(DriveError::remote(500, "boom")) }));
        directory.expect_delete().never();

        let usecase = PruneBackupsUseCase::new(Arc::new(directory));
        let err = usecase.run("backups", 5).await.expect_err("listing failed");

        let drive = err.downcast_ref::<DriveError>().expect("drive error kept");
        assert_eq!(drive.status(), Some(500));
    }
}
