use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{
    entities::remote_entries::RemoteEntry,
    errors::DriveError,
    repositories::{remote_directory::RemoteDirectory, upload_target::UploadTarget},
    value_objects::{
        folder_listing::FolderListing,
        upload_session::{ByteRange, RangeStatus},
    },
};

use super::{
    responses::{
        ListingPage, interpret_delete, interpret_folder_creation, interpret_listing,
        interpret_session_status, interpret_upload_session,
    },
    token_cache::TokenCache,
};

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Clone)]
pub struct GraphDriveConfig {
    pub base_url: Url,
    pub drive_id: String,
}

/// Microsoft Graph drive API client scoped to a single drive.
pub struct GraphDriveClient {
    client: reqwest::Client,
    base_url: Url,
    drive_id: String,
    tokens: Arc<TokenCache>,
}

impl GraphDriveClient {
    pub fn new(client: reqwest::Client, config: GraphDriveConfig, tokens: Arc<TokenCache>) -> Self {
        Self {
            client,
            base_url: config.base_url,
            drive_id: config.drive_id,
            tokens,
        }
    }

    /// `drives/{id}/{segments..}`
    fn drive_url(&self, segments: &[&str]) -> Result<Url, DriveError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DriveError::Transport(format!("invalid graph base url: {}", self.base_url)))?
            .pop_if_empty()
            .push("drives")
            .push(&self.drive_id)
            .extend(segments);
        Ok(url)
    }

    /// `drives/{id}/root:/{path}:/{action}`, or `drives/{id}/root/{action}` for the drive root.
    fn item_path_url(&self, path: &str, action: &str) -> Result<Url, DriveError> {
        let segments = path_segments(path);
        let Some((last, parents)) = segments.split_last() else {
            return self.drive_url(&["root", action]);
        };

        let addressed_last = format!("{last}:");
        let mut all = Vec::with_capacity(segments.len() + 2);
        all.push("root:");
        all.extend(parents.iter().copied());
        all.push(addressed_last.as_str());
        all.push(action);
        self.drive_url(&all)
    }

    /// Sends an authenticated request, refreshing the token and resending once on 401.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, DriveError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.tokens.bearer().await?;
        let response = build(&self.client).bearer_auth(token.value()).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("graph: request rejected with 401; refreshing token and retrying once");
        let token = self.tokens.refresh().await?;
        Ok(build(&self.client).bearer_auth(token.value()).send().await?)
    }

    async fn list_page(&self, url: Url) -> Result<ListingPage, DriveError> {
        let response = self
            .send_authorized(|client| client.request(Method::GET, url.clone()))
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        interpret_listing(status, &body)
    }
}

#[async_trait]
impl RemoteDirectory for GraphDriveClient {
    async fn ensure_folder(&self, folder: &str) -> Result<(), DriveError> {
        let segments = path_segments(folder);
        let Some((name, parents)) = segments.split_last() else {
            return Ok(());
        };

        let url = self.item_path_url(&parents.join("/"), "children")?;
        let payload = json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "rename",
        });

        let response = self
            .send_authorized(|client| client.post(url.clone()).json(&payload))
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        interpret_folder_creation(status, &body)?;

        info!(folder = %folder, status, "graph: folder ensured");
        Ok(())
    }

    async fn list(&self, folder: &str) -> Result<FolderListing, DriveError> {
        let mut url = self.item_path_url(folder, "children")?;
        url.query_pairs_mut()
            .append_pair("$select", "id,name,lastModifiedDateTime");

        let mut entries: Vec<RemoteEntry> = Vec::new();
        loop {
            let page = match self.list_page(url).await? {
                ListingPage::Page(page) => page,
                ListingPage::Absent => return Ok(FolderListing::Absent),
            };
            entries.extend(page.value);

            match page.next_link {
                Some(next) => {
                    url = Url::parse(&next)
                        .map_err(|err| DriveError::Decode(format!("invalid nextLink: {err}")))?;
                    debug!(folder = %folder, listed = entries.len(), "graph: following nextLink");
                }
                None => break,
            }
        }

        Ok(FolderListing::Found(entries))
    }

    async fn delete(&self, entry_id: &str) -> Result<(), DriveError> {
        let url = self.drive_url(&["items", entry_id])?;
        let response = self
            .send_authorized(|client| client.delete(url.clone()))
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        interpret_delete(status, &body)
    }
}

#[async_trait]
impl UploadTarget for GraphDriveClient {
    async fn create_upload_session(
        &self,
        destination: &str,
        file_name: &str,
    ) -> Result<String, DriveError> {
        let item_path = join_item_path(destination, file_name);
        let url = self.item_path_url(&item_path, "createUploadSession")?;
        let payload = json!({
            "item": {
                "@microsoft.graph.conflictBehavior": "rename",
                "name": file_name,
            }
        });

        let response = self
            .send_authorized(|client| client.post(url.clone()).json(&payload))
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        interpret_upload_session(status, &body)
    }

    async fn put_range(
        &self,
        upload_url: &str,
        range: ByteRange,
        total_size: u64,
        body: Bytes,
    ) -> Result<RangeStatus, DriveError> {
        // Upload URLs are pre-authorized; sending a bearer token to them is rejected.
        let response = self
            .client
            .put(upload_url)
            .header(header::CONTENT_RANGE, range.content_range(total_size))
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        match RangeStatus::from_status(status) {
            Some(range_status) => Ok(range_status),
            None => {
                let body = response.text().await.unwrap_or_default();
                Err(DriveError::remote(status, &body))
            }
        }
    }

    async fn next_expected_offset(&self, upload_url: &str) -> Result<Option<u64>, DriveError> {
        let response = self.client.get(upload_url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        interpret_session_status(status, &body)
    }
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn join_item_path(folder: &str, file_name: &str) -> String {
    let mut segments = path_segments(folder);
    segments.push(file_name);
    segments.join("/")
}
