use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Upload sessions reject non-final ranges that are not a multiple of this.
pub const CHUNK_ALIGNMENT_BYTES: u64 = 320 * 1024;

/// Rounds a requested chunk size down to the nearest accepted multiple.
pub fn align_chunk_size(requested: u64) -> u64 {
    let aligned = requested - requested % CHUNK_ALIGNMENT_BYTES;
    aligned.max(CHUNK_ALIGNMENT_BYTES)
}

/// A contiguous, inclusive byte span of the file being uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

/// Iterator over the fixed-size ranges covering `[offset, total_size)`.
#[derive(Debug, Clone)]
pub struct RangePlan {
    offset: u64,
    total_size: u64,
    chunk_size: u64,
}

impl RangePlan {
    pub fn new(offset: u64, total_size: u64, chunk_size: u64) -> Self {
        Self {
            offset: offset.min(total_size),
            total_size,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Iterator for RangePlan {
    type Item = ByteRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.total_size {
            return None;
        }
        let len = self.chunk_size.min(self.total_size - self.offset);
        let range = ByteRange {
            start: self.offset,
            end: self.offset + len - 1,
        };
        self.offset += len;
        Some(range)
    }
}

/// Server response to a successfully applied range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    /// 202: range stored, more expected.
    Accepted,
    /// 201: final range stored and the item was created.
    Created,
    /// 200: final range stored and an existing item was replaced.
    Completed,
}

impl RangeStatus {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            202 => Some(Self::Accepted),
            201 => Some(Self::Created),
            200 => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn finishes_upload(&self) -> bool {
        !matches!(self, Self::Accepted)
    }
}

/// Server-issued upload handle plus the local progress made against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_url: String,
    pub total_size: u64,
    pub next_offset: u64,
    pub local_path: PathBuf,
    pub file_name: String,
    pub destination: String,
}

impl UploadSession {
    pub fn new(
        upload_url: String,
        total_size: u64,
        local_path: PathBuf,
        file_name: String,
        destination: String,
    ) -> Self {
        Self {
            upload_url,
            total_size,
            next_offset: 0,
            local_path,
            file_name,
            destination,
        }
    }

    pub fn remaining_ranges(&self, chunk_size: u64) -> RangePlan {
        RangePlan::new(self.next_offset, self.total_size, chunk_size)
    }

    /// Moves the offset past `range`. Only the range starting at the current offset is accepted.
    pub fn advance(&mut self, range: ByteRange) -> bool {
        if range.start != self.next_offset || range.end >= self.total_size {
            return false;
        }
        self.next_offset = range.end + 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.next_offset >= self.total_size
    }
}
