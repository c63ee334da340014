use std::path::PathBuf;

use thiserror::Error;

const BODY_PREVIEW_CHARS: usize = 512;

/// Failures raised while talking to the remote drive or touching local staging.
#[derive(Debug, Error)]
pub enum DriveError {
    /// Credential exchange was rejected or its response could not be read.
    #[error("credential exchange failed: {0}")]
    Auth(String),

    /// The remote folder is still absent after the create-then-list retry.
    #[error("remote folder not found: {0}")]
    NotFound(String),

    #[error("remote request failed (status {status}): {body}")]
    Remote { status: u16, body: String },

    /// The request never produced a response (connect failure, timeout, reset).
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("local io failure at {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DriveError {
    pub fn remote(status: u16, body: &str) -> Self {
        Self::Remote {
            status,
            body: preview_body(body),
        }
    }

    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Remote {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        Self::Transport(err.to_string())
    }
}

fn preview_body(body: &str) -> String {
    body.trim().chars().take(BODY_PREVIEW_CHARS).collect()
}
