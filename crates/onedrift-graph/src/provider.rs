//! `RemoteClient` implementation over the Graph API
//!
//! Maps the port's capability set onto drive-scoped Graph endpoints and
//! converts wire DTOs into port-level types. Retry policy stays with the
//! engine; this adapter reports classified errors and nothing more.

use chrono::{DateTime, Utc};
use onedrift_core::domain::{DriveId, ItemId};
use onedrift_core::ports::{
    Change, ChunkAck, DeltaPage, RemoteClient, RemoteError, RemoteItem, RemoteUploadSession,
};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::client::{error_for_response, map_transport_error, GraphClient, METADATA_TIMEOUT};
use crate::delta::{self, parse_change, GraphDriveItem};
use crate::transfer;

/// Children listings page through this wrapper
#[derive(Debug, Deserialize)]
struct GraphChildrenResponse {
    #[serde(default)]
    value: Vec<GraphDriveItem>,

    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Convert a wire item into a port item, rejecting deleted facets
fn parse_item(item: GraphDriveItem) -> Result<RemoteItem, RemoteError> {
    match parse_change(item)? {
        Change::Upsert(item) => Ok(item),
        Change::Delete(id) => Err(RemoteError::Validation(format!(
            "expected a live item, got a deletion for {id}"
        ))),
    }
}

/// Microsoft Graph implementation of the `RemoteClient` port
pub struct GraphRemoteClient {
    client: GraphClient,
}

impl GraphRemoteClient {
    /// Wrap an authenticated [`GraphClient`]
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn fetch_item(&self, path: &str) -> Result<Option<RemoteItem>, RemoteError> {
        let response = self
            .client
            .request(Method::GET, path)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }

        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| RemoteError::Network(format!("failed to parse item: {e}")))?;
        Ok(Some(parse_item(item)?))
    }
}

#[async_trait::async_trait]
impl RemoteClient for GraphRemoteClient {
    async fn delta_page(
        &self,
        drive_id: &DriveId,
        cursor: Option<&str>,
    ) -> Result<DeltaPage, RemoteError> {
        delta::fetch_page(&self.client, drive_id, cursor).await
    }

    async fn get_item(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Option<RemoteItem>, RemoteError> {
        self.fetch_item(&format!(
            "/drives/{}/items/{}",
            drive_id.as_str(),
            item_id.as_str()
        ))
        .await
    }

    async fn get_item_by_path(
        &self,
        drive_id: &DriveId,
        path: &str,
    ) -> Result<Option<RemoteItem>, RemoteError> {
        if path.is_empty() {
            return self
                .fetch_item(&format!("/drives/{}/root", drive_id.as_str()))
                .await;
        }
        self.fetch_item(&format!("/drives/{}/root:/{}", drive_id.as_str(), path))
            .await
    }

    async fn list_children(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        let mut items = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let request = match next.take() {
                Some(url) => self.client.request_url(Method::GET, &url),
                None => self.client.request(
                    Method::GET,
                    &format!(
                        "/drives/{}/items/{}/children",
                        drive_id.as_str(),
                        item_id.as_str()
                    ),
                ),
            };

            let response = request
                .timeout(METADATA_TIMEOUT)
                .send()
                .await
                .map_err(map_transport_error)?;
            if !response.status().is_success() {
                return Err(error_for_response(response).await);
            }

            let page: GraphChildrenResponse = response
                .json()
                .await
                .map_err(|e| RemoteError::Network(format!("failed to parse children: {e}")))?;

            for item in page.value {
                items.push(parse_item(item)?);
            }

            match page.next_link {
                Some(url) => next = Some(url),
                None => break,
            }
        }

        Ok(items)
    }

    async fn create_folder(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
    ) -> Result<RemoteItem, RemoteError> {
        let path = format!(
            "/drives/{}/items/{}/children",
            drive_id.as_str(),
            parent_id.as_str()
        );
        let body = serde_json::json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "fail"
        });

        let response = self
            .client
            .request(Method::POST, &path)
            .timeout(METADATA_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }

        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| RemoteError::Network(format!("failed to parse created folder: {e}")))?;
        debug!(name, "created remote folder");
        parse_item(item)
    }

    async fn move_item(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        new_parent_id: &ItemId,
        new_name: &str,
    ) -> Result<RemoteItem, RemoteError> {
        let path = format!(
            "/drives/{}/items/{}",
            drive_id.as_str(),
            item_id.as_str()
        );
        let body = serde_json::json!({
            "parentReference": { "id": new_parent_id.as_str() },
            "name": new_name
        });

        let response = self
            .client
            .request(Method::PATCH, &path)
            .timeout(METADATA_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }

        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| RemoteError::Network(format!("failed to parse moved item: {e}")))?;
        debug!(item = %item_id, new_name, "moved remote item");
        parse_item(item)
    }

    async fn delete_item(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<(), RemoteError> {
        let path = format!(
            "/drives/{}/items/{}",
            drive_id.as_str(),
            item_id.as_str()
        );
        let response = self
            .client
            .request(Method::DELETE, &path)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }
        debug!(item = %item_id, "deleted remote item");
        Ok(())
    }

    async fn download(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, RemoteError> {
        transfer::download_to(&self.client, drive_id, item_id, writer).await
    }

    async fn download_range(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        offset: u64,
    ) -> Result<(u64, u64), RemoteError> {
        transfer::download_range_to(&self.client, drive_id, item_id, writer, offset).await
    }

    async fn upload_small(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        content: Vec<u8>,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<RemoteItem, RemoteError> {
        let item =
            transfer::upload_small(&self.client, drive_id, parent_id, name, content, mtime)
                .await?;
        parse_item(item)
    }

    async fn create_upload_session(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
    ) -> Result<RemoteUploadSession, RemoteError> {
        transfer::create_session(&self.client, drive_id, parent_id, name).await
    }

    async fn upload_chunk(
        &self,
        session_url: &str,
        chunk: Vec<u8>,
        offset: u64,
        total_size: u64,
    ) -> Result<ChunkAck, RemoteError> {
        let (ack, final_item) =
            transfer::put_chunk(&self.client, session_url, chunk, offset, total_size).await?;
        match final_item {
            Some(item) => Ok(ChunkAck {
                next_expected: None,
                item: Some(parse_item(item)?),
            }),
            None => Ok(ack),
        }
    }

    async fn resume_status(&self, session_url: &str) -> Result<u64, RemoteError> {
        transfer::session_status(&self.client, session_url).await
    }
}

// ============================================================================
// Tests
// ============================================================================
