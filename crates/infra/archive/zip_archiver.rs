use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Local;
use tokio::fs;
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::domain::{
    repositories::archiver::BackupArchiver, value_objects::staged_archive::StagedArchive,
};

const ARCHIVE_PREFIX: &str = "backup-";
const ARCHIVE_EXTENSION: &str = "zip";
const ZIP32_LIMIT: u64 = u32::MAX as u64;

/// Writes `backup-YYYYMMDD-HHMMSS.zip` archives of a source tree into a staging directory.
#[derive(Debug, Clone)]
pub struct ZipArchiver {
    staging_dir: PathBuf,
}

impl ZipArchiver {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }
}

#[async_trait]
impl BackupArchiver for ZipArchiver {
    async fn create_archive(&self, source_dir: &Path) -> Result<StagedArchive> {
        fs::create_dir_all(&self.staging_dir)
            .await
            .with_context(|| format!("failed to create staging dir {}", self.staging_dir.display()))?;

        let file_name = format!(
            "{ARCHIVE_PREFIX}{}.{ARCHIVE_EXTENSION}",
            Local::now().format("%Y%m%d-%H%M%S")
        );
        let target = self.staging_dir.join(&file_name);

        let source = source_dir.to_path_buf();
        let staging = self.staging_dir.clone();
        let blocking_target = target.clone();
        let entries = tokio::task::spawn_blocking(move || {
            write_zip(&source, &blocking_target, &staging)
        })
        .await
        .context("archive task panicked")??;

        let size_bytes = fs::metadata(&target)
            .await
            .with_context(|| format!("failed to read metadata for {}", target.display()))?
            .len();

        info!(
            source = %source_dir.display(),
            archive = %target.display(),
            entries,
            size_bytes,
            "archive: source tree archived"
        );

        Ok(StagedArchive {
            path: target,
            file_name,
            size_bytes,
        })
    }

    async fn clear_staging(&self) -> Result<usize> {
        let mut dir = match fs::read_dir(&self.staging_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read staging dir {}", self.staging_dir.display())
                });
            }
        };

        let mut removed = 0;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context("failed to iterate staging dir")?
        {
            let path = entry.path();
            let is_archive = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
            if !is_archive || !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "archive: failed to remove staged file");
                }
            }
        }

        Ok(removed)
    }
}

fn write_zip(source: &Path, target: &Path, staging_dir: &Path) -> Result<usize> {
    if !source.is_dir() {
        bail!("backup source is not a directory: {}", source.display());
    }

    // Skip the staging dir when it lives inside the source tree.
    let staging_canonical = staging_dir.canonicalize().ok();

    let file = File::create(target)
        .with_context(|| format!("failed to create archive {}", target.display()))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let mut entries = 0;

    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match &staging_canonical {
            Some(staging) => entry
                .path()
                .canonicalize()
                .map(|path| &path != staging)
                .unwrap_or(true),
            None => true,
        });

    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("{} escapes the source tree", entry.path().display()))?;
        let name = archive_entry_name(relative);
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;

        let options = file_options(&metadata);
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("failed to add {name} to archive"))?;

        let mut input = File::open(entry.path())
            .with_context(|| format!("failed to open {}", entry.path().display()))?;
        io::copy(&mut input, &mut writer)
            .with_context(|| format!("failed to compress {}", entry.path().display()))?;
        entries += 1;
    }

    let mut inner = writer.finish().context("failed to finalize archive")?;
    inner.flush().context("failed to flush archive")?;

    Ok(entries)
}

fn file_options(metadata: &std::fs::Metadata) -> SimpleFileOptions {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(metadata.len() >= ZIP32_LIMIT);

    #[cfg(unix)]
    let options = {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(metadata.permissions().mode())
    };

    options
}

/// Zip entry names always use `/`, whatever the host separator is.
fn archive_entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
