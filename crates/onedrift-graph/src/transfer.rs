//! Wire-level transfer operations
//!
//! Streaming downloads (full and ranged) and the resumable upload
//! session primitives. Chunking policy and `.partial` bookkeeping belong
//! to the engine's transfer manager; this module only speaks HTTP.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use onedrift_core::domain::{DriveId, ItemId};
use onedrift_core::ports::{ChunkAck, RemoteError, RemoteUploadSession};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::client::{error_for_response, map_transport_error, GraphClient, METADATA_TIMEOUT};
use crate::delta::GraphDriveItem;

// ============================================================================
// Session response types
// ============================================================================

/// Response from creating an upload session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSessionResponse {
    upload_url: String,
    expiration_date_time: Option<DateTime<Utc>>,
}

/// Status body for an in-flight upload session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSessionStatus {
    #[serde(default)]
    next_expected_ranges: Vec<String>,
}

impl UploadSessionStatus {
    /// First byte of the first expected range, e.g. `"26214400-"` → 26214400
    fn next_offset(&self) -> Option<u64> {
        self.next_expected_ranges
            .first()
            .and_then(|r| r.split('-').next())
            .and_then(|s| s.parse().ok())
    }
}

// ============================================================================
// Downloads
// ============================================================================

/// Stream an item's full content into `writer`; returns bytes written
pub(crate) async fn download_to(
    client: &GraphClient,
    drive_id: &DriveId,
    item_id: &ItemId,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
) -> Result<u64, RemoteError> {
    let path = format!(
        "/drives/{}/items/{}/content",
        drive_id.as_str(),
        item_id.as_str()
    );
    let response = client
        .request(Method::GET, &path)
        .send()
        .await
        .map_err(map_transport_error)?;

    if !response.status().is_success() {
        return Err(error_for_response(response).await);
    }

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_transport_error)?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;

    debug!(item = %item_id, bytes = written, "download complete");
    Ok(written)
}

/// Stream an item's content from `offset` into `writer`
///
/// Returns `(bytes_written, total_size)`; the total comes from the
/// `Content-Range` header so callers can detect a re-encoded file whose
/// length no longer matches their stored partial. A server that answers
/// a range request with 200 (full body) is treated as a range failure.
pub(crate) async fn download_range_to(
    client: &GraphClient,
    drive_id: &DriveId,
    item_id: &ItemId,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
    offset: u64,
) -> Result<(u64, u64), RemoteError> {
    let path = format!(
        "/drives/{}/items/{}/content",
        drive_id.as_str(),
        item_id.as_str()
    );
    let response = client
        .request(Method::GET, &path)
        .header("Range", format!("bytes={offset}-"))
        .send()
        .await
        .map_err(map_transport_error)?;

    if response.status() != StatusCode::PARTIAL_CONTENT {
        if response.status().is_success() {
            return Err(RemoteError::Validation(
                "server ignored the range request".to_string(),
            ));
        }
        return Err(error_for_response(response).await);
    }

    // Content-Range: bytes <start>-<end>/<total>
    let total = response
        .headers()
        .get("Content-Range")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|t| t.parse::<u64>().ok())
        .ok_or_else(|| {
            RemoteError::Validation("range response missing Content-Range total".to_string())
        })?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_transport_error)?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;

    debug!(item = %item_id, offset, bytes = written, total, "ranged download complete");
    Ok((written, total))
}

// ============================================================================
// Uploads
// ============================================================================

/// Upload a small file in a single PUT
///
/// `PUT /drives/{d}/items/{parent}:/{name}:/content` with the raw bytes
/// as the body. When `mtime` is given, the filesystem timestamp is
/// patched afterwards so both sides agree on the modification time.
pub(crate) async fn upload_small(
    client: &GraphClient,
    drive_id: &DriveId,
    parent_id: &ItemId,
    name: &str,
    content: Vec<u8>,
    mtime: Option<DateTime<Utc>>,
) -> Result<GraphDriveItem, RemoteError> {
    let path = format!(
        "/drives/{}/items/{}:/{}:/content",
        drive_id.as_str(),
        parent_id.as_str(),
        name
    );
    debug!(name, bytes = content.len(), "simple upload");

    let response = client
        .request(Method::PUT, &path)
        .header("Content-Type", "application/octet-stream")
        .body(content)
        .send()
        .await
        .map_err(map_transport_error)?;

    if !response.status().is_success() {
        return Err(error_for_response(response).await);
    }

    let item: GraphDriveItem = response
        .json()
        .await
        .map_err(|e| RemoteError::Network(format!("failed to parse upload response: {e}")))?;

    if let Some(mtime) = mtime {
        patch_mtime(client, drive_id, &item.id, mtime).await?;
    }

    Ok(item)
}

/// Align the remote fileSystemInfo timestamp with the local mtime
async fn patch_mtime(
    client: &GraphClient,
    drive_id: &DriveId,
    item_id: &str,
    mtime: DateTime<Utc>,
) -> Result<(), RemoteError> {
    let path = format!("/drives/{}/items/{}", drive_id.as_str(), item_id);
    let body = serde_json::json!({
        "fileSystemInfo": {
            "lastModifiedDateTime": mtime.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        }
    });

    let response = client
        .request(Method::PATCH, &path)
        .timeout(METADATA_TIMEOUT)
        .json(&body)
        .send()
        .await
        .map_err(map_transport_error)?;

    if !response.status().is_success() {
        return Err(error_for_response(response).await);
    }
    Ok(())
}

/// Open a resumable upload session
pub(crate) async fn create_session(
    client: &GraphClient,
    drive_id: &DriveId,
    parent_id: &ItemId,
    name: &str,
) -> Result<RemoteUploadSession, RemoteError> {
    let path = format!(
        "/drives/{}/items/{}:/{}:/createUploadSession",
        drive_id.as_str(),
        parent_id.as_str(),
        name
    );
    let body = serde_json::json!({
        "item": { "@microsoft.graph.conflictBehavior": "replace" }
    });

    let response = client
        .request(Method::POST, &path)
        .timeout(METADATA_TIMEOUT)
        .json(&body)
        .send()
        .await
        .map_err(map_transport_error)?;

    if !response.status().is_success() {
        return Err(error_for_response(response).await);
    }

    let session: UploadSessionResponse = response
        .json()
        .await
        .map_err(|e| RemoteError::Network(format!("failed to parse session response: {e}")))?;

    debug!(name, "upload session created");
    Ok(RemoteUploadSession {
        url: session.upload_url,
        expiry: session.expiration_date_time,
    })
}

/// Upload one chunk within a session
///
/// Intermediate chunks are acknowledged with 202 and the next expected
/// range; the final chunk returns the completed item. A 404/410 on the
/// session URL means the session is gone.
pub(crate) async fn put_chunk(
    client: &GraphClient,
    session_url: &str,
    chunk: Vec<u8>,
    offset: u64,
    total_size: u64,
) -> Result<(ChunkAck, Option<GraphDriveItem>), RemoteError> {
    let chunk_len = chunk.len() as u64;
    let content_range = format!("bytes {}-{}/{}", offset, offset + chunk_len - 1, total_size);
    debug!(range = %content_range, "uploading chunk");

    let response = client
        .http()
        .put(session_url)
        .header("Content-Length", chunk_len.to_string())
        .header("Content-Range", &content_range)
        .body(chunk)
        .send()
        .await
        .map_err(map_transport_error)?;

    match response.status() {
        StatusCode::OK | StatusCode::CREATED => {
            let item: GraphDriveItem = response.json().await.map_err(|e| {
                RemoteError::Network(format!("failed to parse final chunk response: {e}"))
            })?;
            Ok((
                ChunkAck {
                    next_expected: None,
                    item: None,
                },
                Some(item),
            ))
        }
        StatusCode::ACCEPTED => {
            let status: UploadSessionStatus = response.json().await.map_err(|e| {
                RemoteError::Network(format!("failed to parse chunk ack: {e}"))
            })?;
            Ok((
                ChunkAck {
                    next_expected: status.next_offset().or(Some(offset + chunk_len)),
                    item: None,
                },
                None,
            ))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(RemoteError::SessionExpired(format!(
            "session URL returned {}",
            response.status()
        ))),
        _ => Err(error_for_response(response).await),
    }
}

/// Query how far an in-flight session has progressed
pub(crate) async fn session_status(
    client: &GraphClient,
    session_url: &str,
) -> Result<u64, RemoteError> {
    let response = client
        .http()
        .get(session_url)
        .timeout(METADATA_TIMEOUT)
        .send()
        .await
        .map_err(map_transport_error)?;

    match response.status() {
        StatusCode::OK => {
            let status: UploadSessionStatus = response.json().await.map_err(|e| {
                RemoteError::Network(format!("failed to parse session status: {e}"))
            })?;
            status.next_offset().ok_or_else(|| {
                RemoteError::SessionExpired("session reports no expected ranges".to_string())
            })
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(RemoteError::SessionExpired(format!(
            "session URL returned {}",
            response.status()
        ))),
        _ => Err(error_for_response(response).await),
    }
}

// ============================================================================
// Tests
// ============================================================================
