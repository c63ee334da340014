use serde::Deserialize;

use crate::domain::{entities::remote_entries::RemoteEntry, errors::DriveError};

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub(crate) access_token: String,
    pub(crate) expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChildrenPage {
    #[serde(default)]
    pub(crate) value: Vec<RemoteEntry>,
    #[serde(rename = "@odata.nextLink")]
    pub(crate) next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadSessionResponse {
    #[serde(rename = "uploadUrl")]
    pub(crate) upload_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadSessionStatus {
    #[serde(rename = "nextExpectedRanges", default)]
    pub(crate) next_expected_ranges: Vec<String>,
}

#[derive(Debug)]
pub(crate) enum ListingPage {
    Page(ChildrenPage),
    Absent,
}

pub(crate) fn interpret_token(status: u16, body: &str) -> Result<TokenResponse, DriveError> {
    if status != 200 {
        let preview: String = body.trim().chars().take(512).collect();
        return Err(DriveError::Auth(format!(
            "token endpoint returned status {status}: {preview}"
        )));
    }

    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|err| DriveError::Auth(format!("unparseable token response: {err}")))?;
    if token.access_token.is_empty() {
        return Err(DriveError::Auth(
            "token response did not contain access_token".to_string(),
        ));
    }

    Ok(token)
}

pub(crate) fn interpret_listing(status: u16, body: &str) -> Result<ListingPage, DriveError> {
    match status {
        200 => serde_json::from_str(body)
            .map(ListingPage::Page)
            .map_err(|err| DriveError::Decode(format!("children listing: {err}"))),
        404 => Ok(ListingPage::Absent),
        _ => Err(DriveError::remote(status, body)),
    }
}

pub(crate) fn interpret_folder_creation(status: u16, body: &str) -> Result<(), DriveError> {
    match status {
        200 | 201 => Ok(()),
        _ => Err(DriveError::remote(status, body)),
    }
}

pub(crate) fn interpret_delete(status: u16, body: &str) -> Result<(), DriveError> {
    match status {
        204 => Ok(()),
        _ => Err(DriveError::remote(status, body)),
    }
}

pub(crate) fn interpret_upload_session(status: u16, body: &str) -> Result<String, DriveError> {
    if status != 200 {
        return Err(DriveError::remote(status, body));
    }

    let session: UploadSessionResponse = serde_json::from_str(body)
        .map_err(|err| DriveError::Decode(format!("upload session: {err}")))?;
    if session.upload_url.is_empty() {
        return Err(DriveError::Decode("upload session without uploadUrl".to_string()));
    }

    Ok(session.upload_url)
}

/// Reads the start of the first `nextExpectedRanges` entry (`"26214400-"` or `"0-1023"`).
pub(crate) fn interpret_session_status(status: u16, body: &str) -> Result<Option<u64>, DriveError> {
    match status {
        200 => {}
        404 => return Ok(None),
        _ => return Err(DriveError::remote(status, body)),
    }

    let session: UploadSessionStatus = serde_json::from_str(body)
        .map_err(|err| DriveError::Decode(format!("upload session status: {err}")))?;
    let Some(first) = session.next_expected_ranges.first() else {
        return Ok(None);
    };

    let start = first.split('-').next().unwrap_or_default().trim();
    start
        .parse::<u64>()
        .map(Some)
        .map_err(|err| DriveError::Decode(format!("nextExpectedRanges {first:?}: {err}")))
}
