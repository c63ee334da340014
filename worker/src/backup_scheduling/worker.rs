use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use crate::usecases::backup_cycle::{BackupCycleParams, BackupCycleUseCase, CycleResult};

/// Runs a cycle, waits `interval`, repeats. Cycle failures are logged and never end the loop.
pub async fn run(
    usecase: Arc<BackupCycleUseCase>,
    params: BackupCycleParams,
    interval: Duration,
) -> Result<()> {
    info!(
        interval_secs = interval.as_secs(),
        "backup_scheduling: starting worker loop"
    );
    loop {
        match usecase.run_cycle(&params).await {
            Ok(result) => log_cycle(&result),
            Err(e) => {
                error!(error = %format!("{e:#}"), "backup_scheduling: backup cycle failed");
            }
        }

        info!(
            interval_secs = interval.as_secs(),
            "backup_scheduling: waiting for next cycle"
        );
        tokio::time::sleep(interval).await;
    }
}

/// Runs exactly one cycle and hands its outcome to the caller.
pub async fn run_once(
    usecase: Arc<BackupCycleUseCase>,
    params: BackupCycleParams,
) -> Result<CycleResult> {
    info!("backup_scheduling: running a single backup cycle");
    let result = usecase.run_cycle(&params).await?;
    log_cycle(&result);
    Ok(result)
}

fn log_cycle(result: &CycleResult) {
    let Some(upload) = result.upload.as_ref() else {
        return;
    };
    info!(
        file_name = %upload.file_name,
        size_bytes = upload.total_size,
        ranges_sent = upload.ranges_sent,
        attempts = upload.attempts,
        pruned = result.prune.deleted,
        "backup_scheduling: backup stored"
    );
}
