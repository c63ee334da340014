use anyhow::Result;
use backup_core::{
    domain::repositories::{
        archiver::BackupArchiver, remote_directory::RemoteDirectory, sleeper::Sleeper,
        token_provider::TokenProvider, upload_session_store::UploadSessionStore,
        upload_target::UploadTarget,
    },
    infra::{
        archive::zip_archiver::ZipArchiver,
        graph::{
            drive_client::{GraphDriveClient, GraphDriveConfig},
            http::build_http_client,
            token_cache::TokenCache,
            token_client::{
                ClientCredentialsConfig, ClientCredentialsTokenProvider, GRAPH_DEFAULT_SCOPE,
            },
        },
        session_store::json_file::JsonFileSessionStore,
        sleeper::TokioSleeper,
    },
};
use std::sync::Arc;
use tracing::{error, info};
use worker::{
    backup_scheduling, config,
    config::config_model::RunMode,
    usecases::{
        backup_cycle::{BackupCycleParams, BackupCycleUseCase},
        prune_backups::PruneBackupsUseCase,
        resumable_upload::ResumableUploader,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!("Worker exited with error: {:#}", error);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    backup_core::observability::init_observability("worker")?;

    let dotenvy_env = config::config_loader::load()?;
    info!("ENV has been loaded");

    let http_client = build_http_client(&dotenvy_env.http)?;
    let sleeper: Arc<dyn Sleeper + Send + Sync> = Arc::new(TokioSleeper);

    let drive = &dotenvy_env.drive;
    let token_provider: Arc<dyn TokenProvider + Send + Sync> =
        Arc::new(ClientCredentialsTokenProvider::new(
            http_client.clone(),
            ClientCredentialsConfig {
                login_base_url: drive.login_base_url.clone(),
                tenant_id: drive.tenant_id.clone(),
                client_id: drive.client_id.clone(),
                client_secret: drive.client_secret.clone(),
                scope: GRAPH_DEFAULT_SCOPE.to_string(),
            },
        )?);
    let tokens = Arc::new(TokenCache::new(
        token_provider,
        Arc::clone(&sleeper),
        dotenvy_env.auth.token_retry,
    ));

    let graph_client = Arc::new(GraphDriveClient::new(
        http_client,
        GraphDriveConfig {
            base_url: drive.graph_base_url.clone(),
            drive_id: drive.drive_id.clone(),
        },
        tokens,
    ));
    info!(drive_id = %drive.drive_id, "Graph drive client has been created");

    let directory: Arc<dyn RemoteDirectory + Send + Sync> = graph_client.clone();
    let upload_target: Arc<dyn UploadTarget + Send + Sync> = graph_client;

    let backup = &dotenvy_env.backup;
    let archiver: Arc<dyn BackupArchiver + Send + Sync> =
        Arc::new(ZipArchiver::new(&backup.staging_dir));
    let session_store: Arc<dyn UploadSessionStore + Send + Sync> =
        Arc::new(JsonFileSessionStore::new(&backup.upload_state_path));

    let uploader = Arc::new(ResumableUploader::new(
        upload_target,
        Arc::clone(&session_store),
        Arc::clone(&sleeper),
        dotenvy_env.upload.chunk_size_bytes,
        dotenvy_env.upload.range_retry,
    ));
    let prune_usecase = Arc::new(PruneBackupsUseCase::new(directory));

    let run_mode = dotenvy_env.schedule.run_mode;
    let cycle_usecase = Arc::new(BackupCycleUseCase::new(
        archiver,
        prune_usecase,
        uploader,
        session_store,
        sleeper,
        dotenvy_env.upload.step_retry(run_mode),
    ));

    let params = BackupCycleParams {
        source_dir: backup.source_dir.clone(),
        destination_folder: backup.destination_folder.clone(),
        max_backups: backup.max_backups,
    };
    info!(
        source = %params.source_dir.display(),
        staging = %backup.staging_dir.display(),
        destination = %params.destination_folder,
        max_backups = params.max_backups,
        run_mode = ?run_mode,
        "Worker started"
    );

    match run_mode {
        RunMode::Once => {
            backup_scheduling::worker::run_once(cycle_usecase, params).await?;
        }
        RunMode::Loop => {
            let backup_loop = tokio::spawn(backup_scheduling::worker::run(
                cycle_usecase,
                params,
                dotenvy_env.schedule.interval,
            ));

            tokio::select! {
                result = backup_loop => result??,
                _ = shutdown_signal() => info!("Shutdown signal received; stopping worker"),
            };
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", error);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!("Failed to listen for SIGTERM: {}", error);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
