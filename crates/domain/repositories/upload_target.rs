use async_trait::async_trait;
use bytes::Bytes;
use mockall::automock;

use crate::domain::{
    errors::DriveError,
    value_objects::upload_session::{ByteRange, RangeStatus},
};

#[async_trait]
#[automock]
pub trait UploadTarget {
    /// Opens a resumable upload for `destination/file_name` and returns its upload URL.
    async fn create_upload_session(
        &self,
        destination: &str,
        file_name: &str,
    ) -> Result<String, DriveError>;

    /// PUTs one byte range. Any non-success response is returned as `DriveError::Remote`.
    async fn put_range(
        &self,
        upload_url: &str,
        range: ByteRange,
        total_size: u64,
        body: Bytes,
    ) -> Result<RangeStatus, DriveError>;

    /// Asks the service where an open session expects the next byte. `None` means the
    /// session expired or no longer accepts ranges.
    async fn next_expected_offset(&self, upload_url: &str) -> Result<Option<u64>, DriveError>;
}
