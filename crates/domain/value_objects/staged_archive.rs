use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArchive {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}
