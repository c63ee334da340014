use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use backup_core::domain::{
    errors::DriveError,
    repositories::{
        sleeper::Sleeper, upload_session_store::UploadSessionStore, upload_target::UploadTarget,
    },
    value_objects::{
        retry_policy::RetryPolicy,
        staged_archive::StagedArchive,
        upload_session::{ByteRange, RangeStatus, UploadSession},
    },
};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub file_name: String,
    pub total_size: u64,
    /// Ranges acknowledged by the service during this call.
    pub ranges_sent: usize,
    /// PUT requests issued, retries included.
    pub attempts: usize,
    /// Offset the transfer continued from when an earlier session was resumed.
    pub resumed_from: Option<u64>,
}

/// Sends a file through a resumable upload session, one range at a time.
pub struct ResumableUploader {
    target: Arc<dyn UploadTarget + Send + Sync>,
    session_store: Arc<dyn UploadSessionStore + Send + Sync>,
    sleeper: Arc<dyn Sleeper + Send + Sync>,
    chunk_size: u64,
    range_retry: RetryPolicy,
}

impl ResumableUploader {
    pub fn new(
        target: Arc<dyn UploadTarget + Send + Sync>,
        session_store: Arc<dyn UploadSessionStore + Send + Sync>,
        sleeper: Arc<dyn Sleeper + Send + Sync>,
        chunk_size: u64,
        range_retry: RetryPolicy,
    ) -> Self {
        Self {
            target,
            session_store,
            sleeper,
            chunk_size: chunk_size.max(1),
            range_retry,
        }
    }

    pub async fn upload_archive(
        &self,
        archive: &StagedArchive,
        destination: &str,
    ) -> Result<UploadReport> {
        let mut file = tokio::fs::File::open(&archive.path)
            .await
            .map_err(|err| DriveError::local_io(&archive.path, err))?;

        self.upload(
            &mut file,
            archive.size_bytes,
            &archive.path,
            destination,
            &archive.file_name,
        )
        .await
    }

    /// Continues a persisted session from the local file it was started for.
    pub async fn resume_persisted(&self, session: UploadSession) -> Result<UploadReport> {
        let mut file = tokio::fs::File::open(&session.local_path)
            .await
            .map_err(|err| DriveError::local_io(&session.local_path, err))?;

        self.resume(&mut file, session).await
    }

    pub async fn upload<R>(
        &self,
        reader: &mut R,
        total_size: u64,
        local_path: &Path,
        destination: &str,
        file_name: &str,
    ) -> Result<UploadReport>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        if total_size == 0 {
            return Err(DriveError::local_io(
                local_path,
                io::Error::new(io::ErrorKind::InvalidInput, "refusing to upload an empty file"),
            )
            .into());
        }

        let upload_url = self
            .target
            .create_upload_session(destination, file_name)
            .await
            .with_context(|| format!("failed to open upload session for {file_name}"))?;
        info!(
            file_name = %file_name,
            destination = %destination,
            total_size,
            "resumable_upload: upload session opened"
        );

        let session = UploadSession::new(
            upload_url,
            total_size,
            local_path.to_path_buf(),
            file_name.to_string(),
            destination.to_string(),
        );
        self.persist(&session).await;

        self.transmit(reader, session, None).await
    }

    /// Realigns `session` with the offset the service expects, then sends the remaining ranges.
    pub async fn resume<R>(&self, reader: &mut R, mut session: UploadSession) -> Result<UploadReport>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let expected = self
            .target
            .next_expected_offset(&session.upload_url)
            .await
            .context("failed to query upload session status")?;

        match expected {
            Some(offset) if offset <= session.total_size => {
                if offset != session.next_offset {
                    warn!(
                        file_name = %session.file_name,
                        recorded = session.next_offset,
                        expected = offset,
                        "resumable_upload: realigning to the offset the service expects"
                    );
                    session.next_offset = offset;
                }
            }
            _ => {
                return Err(DriveError::NotFound(format!(
                    "upload session for {} is no longer open",
                    session.file_name
                ))
                .into());
            }
        }

        let resumed_from = session.next_offset;
        info!(
            file_name = %session.file_name,
            next_offset = resumed_from,
            total_size = session.total_size,
            "resumable_upload: resuming upload session"
        );
        self.transmit(reader, session, Some(resumed_from)).await
    }

    async fn transmit<R>(
        &self,
        reader: &mut R,
        mut session: UploadSession,
        resumed_from: Option<u64>,
    ) -> Result<UploadReport>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let mut report = UploadReport {
            file_name: session.file_name.clone(),
            total_size: session.total_size,
            resumed_from,
            ..Default::default()
        };

        let ranges: Vec<ByteRange> = session.remaining_ranges(self.chunk_size).collect();
        let mut finished = false;
        for range in ranges {
            let body = read_range(reader, range, &session.local_path).await?;
            let status = self.put_with_retry(&session, range, body, &mut report).await?;

            session.advance(range);
            report.ranges_sent += 1;

            if status.finishes_upload() || session.is_complete() {
                finished = true;
                break;
            }
            self.persist(&session).await;
        }

        if !finished {
            bail!(
                "upload of {} ended at offset {} without the service completing it",
                session.file_name,
                session.next_offset
            );
        }
        if !session.is_complete() {
            warn!(
                file_name = %session.file_name,
                next_offset = session.next_offset,
                total_size = session.total_size,
                "resumable_upload: service completed the upload before the last range"
            );
        }

        if let Err(err) = self.session_store.clear().await {
            warn!(error = %err, "resumable_upload: failed to clear persisted session");
        }

        info!(
            file_name = %report.file_name,
            total_size = report.total_size,
            ranges_sent = report.ranges_sent,
            attempts = report.attempts,
            "resumable_upload: upload completed"
        );
        Ok(report)
    }

    async fn put_with_retry(
        &self,
        session: &UploadSession,
        range: ByteRange,
        body: Bytes,
        report: &mut UploadReport,
    ) -> Result<RangeStatus> {
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            report.attempts += 1;

            let result = self
                .target
                .put_range(&session.upload_url, range, session.total_size, body.clone())
                .await;
            match result {
                Ok(status) => return Ok(status),
                Err(err) if self.range_retry.should_retry(attempt) => {
                    warn!(
                        file_name = %session.file_name,
                        range = %range.content_range(session.total_size),
                        attempt,
                        error = %err,
                        backoff_secs = self.range_retry.backoff().as_secs(),
                        "resumable_upload: range failed; resending"
                    );
                    self.sleeper.sleep(self.range_retry.backoff()).await;
                }
                Err(err) => {
                    error!(
                        file_name = %session.file_name,
                        range = %range.content_range(session.total_size),
                        attempt,
                        error = %err,
                        "resumable_upload: range retries exhausted; abandoning upload"
                    );
                    return Err(anyhow::Error::new(err).context(format!(
                        "abandoned {} after {attempt} attempts",
                        range.content_range(session.total_size)
                    )));
                }
            }
        }
    }

    /// Losing the persisted state only costs a future resume, so failures are logged.
    async fn persist(&self, session: &UploadSession) {
        if let Err(err) = self.session_store.save(session).await {
            warn!(
                file_name = %session.file_name,
                next_offset = session.next_offset,
                error = %err,
                "resumable_upload: failed to persist upload session"
            );
        }
    }
}

async fn read_range<R>(reader: &mut R, range: ByteRange, path: &Path) -> Result<Bytes, DriveError>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    let len = usize::try_from(range.byte_count())
        .map_err(|_| DriveError::local_io(path, io::Error::other("range larger than memory")))?;

    reader
        .seek(SeekFrom::Start(range.start))
        .await
        .map_err(|err| DriveError::local_io(path, err))?;
    let mut buffer = vec![0_u8; len];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|err| DriveError::local_io(path, err))?;

    Ok(Bytes::from(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::domain::{
        repositories::{
            sleeper::MockSleeper, upload_session_store::MockUploadSessionStore,
            upload_target::MockUploadTarget,
        },
        value_objects::upload_session::DEFAULT_CHUNK_SIZE_BYTES,
    };
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const MIB: u64 = 1024 * 1024;
    const UPLOAD_URL: &str = "https://upload.example/session/1";

    type PutLog = Arc<Mutex<Vec<(String, Bytes)>>>;

    fn patterned(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn store_recording(saved: Arc<Mutex<Vec<u64>>>, clears: usize) -> MockUploadSessionStore {
        let mut store = MockUploadSessionStore::new();
        store.expect_save().returning(move |session| {
            saved.lock().unwrap().push(session.next_offset);
            Box::pin(async { Ok(()) })
        });
        store
            .expect_clear()
            .times(clears)
            .returning(|| Box::pin(async { Ok(()) }));
        store
    }

    fn no_sleep() -> MockSleeper {
        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().never();
        sleeper
    }

    /// Answers 202 until the final byte, then 201. Calls listed in `failing` answer 503.
    fn target_recording(log: PutLog, failing: Vec<usize>) -> MockUploadTarget {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut target = MockUploadTarget::new();
        target
            .expect_create_upload_session()
            .withf(|destination, file_name| destination == "backups" && file_name == "backup.zip")
            .returning(|_, _| Box::pin(async { Ok(UPLOAD_URL.to_string()) }));
        target
            .expect_put_range()
            .returning(move |url, range, total, body| {
                assert_eq!(url, UPLOAD_URL);
                let call = calls.fetch_add(1, Ordering::SeqCst);
                log.lock().unwrap().push((range.content_range(total), body));
                let fail = failing.contains(&call);
                let last = range.end + 1 == total;
                Box::pin(async move {
                    if fail {
                        Err(DriveError::remote(503, "service unavailable"))
                    } else if last {
                        Ok(RangeStatus::Created)
                    } else {
                        Ok(RangeStatus::Accepted)
                    }
                })
            });
        target
    }

    fn uploader(
        target: MockUploadTarget,
        store: MockUploadSessionStore,
        sleeper: MockSleeper,
        range_retry: RetryPolicy,
    ) -> ResumableUploader {
        ResumableUploader::new(
            Arc::new(target),
            Arc::new(store),
            Arc::new(sleeper),
            DEFAULT_CHUNK_SIZE_BYTES,
            range_retry,
        )
    }

    #[tokio::test]
    async fn twenty_five_mib_upload_sends_three_ranges() {
        let total = 25 * MIB;
        let data = patterned(total);
        let log: PutLog = Arc::default();
        let saved = Arc::new(Mutex::new(Vec::new()));

        let uploader = uploader(
            target_recording(Arc::clone(&log), Vec::new()),
            store_recording(Arc::clone(&saved), 1),
            no_sleep(),
            RetryPolicy::forever(Duration::from_secs(10)),
        );

        let mut reader = Cursor::new(data.clone());
        let report = uploader
            .upload(&mut reader, total, Path::new("/staging/backup.zip"), "backups", "backup.zip")
            .await
            .expect("upload");

        let log = log.lock().unwrap();
        let headers: Vec<&str> = log.iter().map(|(header, _)| header.as_str()).collect();
        assert_eq!(
            headers,
            vec![
                "bytes 0-10485759/26214400",
                "bytes 10485760-20971519/26214400",
                "bytes 20971520-26214399/26214400",
            ]
        );
        assert_eq!(log[1].1.as_ref(), &data[10 * 1024 * 1024..20 * 1024 * 1024]);
        assert_eq!(report.ranges_sent, 3);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.resumed_from, None);
        assert_eq!(*saved.lock().unwrap(), vec![0, 10 * MIB, 20 * MIB]);
    }

    #[tokio::test]
    async fn accepted_final_range_completes_upload() {
        let total = 2 * MIB;
        let mut target = MockUploadTarget::new();
        target
            .expect_create_upload_session()
            .returning(|_, _| Box::pin(async { Ok(UPLOAD_URL.to_string()) }));
        target
            .expect_put_range()
            .times(2)
            .returning(|_, _, _, _| Box::pin(async { Ok(RangeStatus::Accepted) }));
        let saved = Arc::new(Mutex::new(Vec::new()));

        let uploader = ResumableUploader::new(
            Arc::new(target),
            Arc::new(store_recording(Arc::clone(&saved), 1)),
            Arc::new(no_sleep()),
            MIB,
            RetryPolicy::once(),
        );

        let mut reader = Cursor::new(patterned(total));
        let report = uploader
            .upload(&mut reader, total, Path::new("/staging/x.zip"), "backups", "x.zip")
            .await
            .expect("a 202 on the last range still completes the upload");

        assert_eq!(report.ranges_sent, 2);
        assert_eq!(report.total_size, total);
        assert_eq!(*saved.lock().unwrap(), vec![0, MIB]);
    }

    #[tokio::test]
    async fn failed_range_is_resent_with_identical_bytes() {
        let total = 25 * MIB;
        let log: PutLog = Arc::default();
        let saved = Arc::new(Mutex::new(Vec::new()));

        let backoff = Duration::from_secs(10);
        let mut sleeper = MockSleeper::new();
        sleeper
            .expect_sleep()
            .withf(move |d| *d == backoff)
            .times(1)
            .returning(|_| Box::pin(async {}));

        let uploader = uploader(
            target_recording(Arc::clone(&log), vec![1]),
            store_recording(Arc::clone(&saved), 1),
            sleeper,
            RetryPolicy::forever(backoff),
        );

        let mut reader = Cursor::new(patterned(total));
        let report = uploader
            .upload(&mut reader, total, Path::new("/staging/backup.zip"), "backups", "backup.zip")
            .await
            .expect("upload");

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[1].0, "bytes 10485760-20971519/26214400");
        assert_eq!(log[2].0, log[1].0);
        assert_eq!(log[2].1, log[1].1);
        assert_eq!(report.attempts, 4);
        assert_eq!(report.ranges_sent, 3);
        // Offset never moved past the failed range before it succeeded.
        assert_eq!(*saved.lock().unwrap(), vec![0, 10 * MIB, 20 * MIB]);
    }

    #[tokio::test]
    async fn bounded_retry_abandons_upload() {
        let total = 25 * MIB;
        let log: PutLog = Arc::default();

        let mut sleeper = MockSleeper::new();
        sleeper
            .expect_sleep()
            .times(2)
            .returning(|_| Box::pin(async {}));

        let uploader = uploader(
            target_recording(Arc::clone(&log), vec![1, 2, 3]),
            store_recording(Arc::new(Mutex::new(Vec::new())), 0),
            sleeper,
            RetryPolicy::bounded(3, Duration::from_secs(1)),
        );

        let mut reader = Cursor::new(patterned(total));
        let err = uploader
            .upload(&mut reader, total, Path::new("/staging/backup.zip"), "backups", "backup.zip")
            .await
            .expect_err("abandoned");

        assert_eq!(log.lock().unwrap().len(), 4);
        let drive = err.downcast_ref::<DriveError>().expect("drive error kept");
        assert_eq!(drive.status(), Some(503));
    }

    #[tokio::test]
    async fn resume_sends_only_remaining_ranges() {
        let total = 25 * MIB;
        let log: PutLog = Arc::default();
        let saved = Arc::new(Mutex::new(Vec::new()));

        let mut target = target_recording(Arc::clone(&log), Vec::new());
        target
            .expect_next_expected_offset()
            .withf(|url| url == UPLOAD_URL)
            .returning(|_| Box::pin(async { Ok(Some(10 * MIB)) }));

        let uploader = uploader(
            target,
            store_recording(Arc::clone(&saved), 1),
            no_sleep(),
            RetryPolicy::forever(Duration::from_secs(10)),
        );

        let mut session = UploadSession::new(
            UPLOAD_URL.to_string(),
            total,
            PathBuf::from("/staging/backup.zip"),
            "backup.zip".to_string(),
            "backups".to_string(),
        );
        session.next_offset = 10 * MIB;

        let mut reader = Cursor::new(patterned(total));
        let report = uploader.resume(&mut reader, session).await.expect("resume");

        let log = log.lock().unwrap();
        let headers: Vec<&str> = log.iter().map(|(header, _)| header.as_str()).collect();
        assert_eq!(
            headers,
            vec!["bytes 10485760-20971519/26214400", "bytes 20971520-26214399/26214400"]
        );
        assert_eq!(report.resumed_from, Some(10 * MIB));
        assert_eq!(*saved.lock().unwrap(), vec![20 * MIB]);
    }

    #[tokio::test]
    async fn resume_follows_service_offset() {
        let total = 25 * MIB;
        let log: PutLog = Arc::default();

        let mut target = target_recording(Arc::clone(&log), Vec::new());
        target
            .expect_next_expected_offset()
            .returning(|_| Box::pin(async { Ok(Some(20 * MIB)) }));

        let uploader = uploader(
            target,
            store_recording(Arc::new(Mutex::new(Vec::new())), 1),
            no_sleep(),
            RetryPolicy::forever(Duration::from_secs(10)),
        );

        let mut session = UploadSession::new(
            UPLOAD_URL.to_string(),
            total,
            PathBuf::from("/staging/backup.zip"),
            "backup.zip".to_string(),
            "backups".to_string(),
        );
        session.next_offset = 10 * MIB;

        let mut reader = Cursor::new(patterned(total));
        let report = uploader.resume(&mut reader, session).await.expect("resume");

        assert_eq!(report.resumed_from, Some(20 * MIB));
        assert_eq!(log.lock().unwrap()[0].0, "bytes 20971520-26214399/26214400");
    }

    #[tokio::test]
    async fn expired_session_cannot_be_resumed() {
        let mut target = MockUploadTarget::new();
        target
            .expect_next_expected_offset()
            .returning(|_| Box::pin(async { Ok(None) }));
        target.expect_put_range().never();

        let mut store = MockUploadSessionStore::new();
        store.expect_save().never();
        store.expect_clear().never();

        let uploader = uploader(
            target,
            store,
            no_sleep(),
            RetryPolicy::forever(Duration::from_secs(10)),
        );

        let session = UploadSession::new(
            UPLOAD_URL.to_string(),
            MIB,
            PathBuf::from("/staging/backup.zip"),
            "backup.zip".to_string(),
            "backups".to_string(),
        );
        let err = uploader
            .resume(&mut Cursor::new(patterned(MIB)), session)
            .await
            .expect_err("expired");

        assert!(matches!(
            err.downcast_ref::<DriveError>(),
            Some(DriveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_locally() {
        let mut target = MockUploadTarget::new();
        target.expect_create_upload_session().never();

        let uploader = uploader(
            target,
            MockUploadSessionStore::new(),
            no_sleep(),
            RetryPolicy::forever(Duration::from_secs(10)),
        );

        let err = uploader
            .upload(
                &mut Cursor::new(Vec::new()),
                0,
                Path::new("/staging/empty.zip"),
                "backups",
                "empty.zip",
            )
            .await
            .expect_err("empty");

        assert!(matches!(
            err.downcast_ref::<DriveError>(),
            Some(DriveError::LocalIo { .. })
        ));
    }

    #[tokio::test]
    async fn short_local_file_is_a_local_error() {
        let log: PutLog = Arc::default();
        let uploader = uploader(
            target_recording(Arc::clone(&log), Vec::new()),
            store_recording(Arc::new(Mutex::new(Vec::new())), 0),
            no_sleep(),
            RetryPolicy::forever(Duration::from_secs(10)),
        );

        // The recorded size claims more bytes than the reader holds.
        let err = uploader
            .upload(
                &mut Cursor::new(patterned(MIB)),
                2 * MIB,
                Path::new("/staging/backup.zip"),
                "backups",
                "backup.zip",
            )
            .await
            .expect_err("truncated");

        assert!(matches!(
            err.downcast_ref::<DriveError>(),
            Some(DriveError::LocalIo { .. })
        ));
        assert!(log.lock().unwrap().is_empty());
    }
}
