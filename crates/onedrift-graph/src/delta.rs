//! Delta page retrieval and parsing
//!
//! Fetches one page per call so the ingester can persist the cursor at
//! page boundaries. Cursors are the full `@odata.nextLink` /
//! `@odata.deltaLink` URLs, kept opaque end to end.
//!
//! See: <https://learn.microsoft.com/en-us/graph/api/driveitem-delta>

use chrono::{DateTime, Utc};
use onedrift_core::domain::{DriveId, ItemId, ItemType};
use onedrift_core::ports::{Change, DeltaPage, RemoteError, RemoteItem};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{error_for_response, map_transport_error, GraphClient, METADATA_TIMEOUT};

// ============================================================================
// Graph API response types (JSON deserialization)
// ============================================================================

/// Raw response from the delta endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct GraphDeltaResponse {
    #[serde(default)]
    pub(crate) value: Vec<GraphDriveItem>,

    /// URL for the next page of results (present when more pages exist)
    #[serde(rename = "@odata.nextLink")]
    pub(crate) next_link: Option<String>,

    /// URL containing the delta token for the next sync cycle
    /// (present only on the last page of results)
    #[serde(rename = "@odata.deltaLink")]
    pub(crate) delta_link: Option<String>,
}

/// A drive item as the Graph API reports it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphDriveItem {
    pub(crate) id: String,

    #[serde(default)]
    pub(crate) name: String,

    pub(crate) size: Option<u64>,

    pub(crate) e_tag: Option<String>,

    pub(crate) created_date_time: Option<DateTime<Utc>>,

    pub(crate) last_modified_date_time: Option<DateTime<Utc>>,

    pub(crate) parent_reference: Option<GraphParentReference>,

    /// File facet (present if the item is a file)
    pub(crate) file: Option<GraphFileFacet>,

    /// Folder facet (present if the item is a folder)
    pub(crate) folder: Option<serde_json::Value>,

    /// Root facet (present only on the drive root)
    pub(crate) root: Option<serde_json::Value>,

    /// Deleted facet (present if the item has been deleted)
    pub(crate) deleted: Option<serde_json::Value>,
}

/// Parent reference information for a drive item
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphParentReference {
    pub(crate) drive_id: Option<String>,
    pub(crate) id: Option<String>,
}

/// File facet carrying content hashes
#[derive(Debug, Deserialize)]
pub(crate) struct GraphFileFacet {
    pub(crate) hashes: Option<GraphHashes>,
}

/// Hash values for a file
///
/// quickXorHash is the one the engine compares; the SHA values appear
/// on business drives but are not always present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphHashes {
    pub(crate) quick_xor_hash: Option<String>,
    #[allow(dead_code)]
    pub(crate) sha256_hash: Option<String>,
    #[allow(dead_code)]
    pub(crate) sha1_hash: Option<String>,
}

// ============================================================================
// Parsing into port-level types
// ============================================================================

/// Convert one Graph drive item into a port-level [`Change`]
pub(crate) fn parse_change(item: GraphDriveItem) -> Result<Change, RemoteError> {
    let id = ItemId::new(item.id.clone())
        .map_err(|e| RemoteError::Validation(format!("bad item id in delta: {e}")))?;

    if item.deleted.is_some() {
        return Ok(Change::Delete(id));
    }

    let item_type = if item.root.is_some() {
        ItemType::Root
    } else if item.folder.is_some() {
        ItemType::Folder
    } else {
        ItemType::File
    };

    let quick_xor_hash = item
        .file
        .as_ref()
        .and_then(|f| f.hashes.as_ref())
        .and_then(|h| h.quick_xor_hash.clone());

    let parent_drive_id = item
        .parent_reference
        .as_ref()
        .and_then(|pr| pr.drive_id.as_deref())
        .map(DriveId::new);

    let parent_id = match item
        .parent_reference
        .as_ref()
        .and_then(|pr| pr.id.clone())
    {
        Some(pid) => Some(
            ItemId::new(pid)
                .map_err(|e| RemoteError::Validation(format!("bad parent id in delta: {e}")))?,
        ),
        None => None,
    };

    Ok(Change::Upsert(RemoteItem {
        id,
        name: item.name,
        parent_drive_id,
        parent_id,
        item_type,
        size: item.size,
        quick_xor_hash,
        etag: item.e_tag,
        created: item.created_date_time,
        modified: item.last_modified_date_time,
    }))
}

/// Convert a raw delta response into a port-level [`DeltaPage`]
pub(crate) fn parse_page(response: GraphDeltaResponse) -> Result<DeltaPage, RemoteError> {
    let mut changes = Vec::with_capacity(response.value.len());
    for item in response.value {
        changes.push(parse_change(item)?);
    }

    if response.next_link.is_none() && response.delta_link.is_none() {
        warn!("delta page carried neither nextLink nor deltaLink");
    }

    Ok(DeltaPage {
        changes,
        next_token: response.next_link,
        terminal_token: response.delta_link,
    })
}

// ============================================================================
// Page fetch
// ============================================================================

/// Fetch one delta page
///
/// With no cursor, starts a full enumeration at the drive root. A cursor
/// is a previously returned link URL (nextLink mid-enumeration,
/// deltaLink between cycles). HTTP 410 means the remote invalidated the
/// token and the caller must restart with no cursor.
pub(crate) async fn fetch_page(
    client: &GraphClient,
    drive_id: &DriveId,
    cursor: Option<&str>,
) -> Result<DeltaPage, RemoteError> {
    let request = match cursor {
        Some(url) => client.request_url(Method::GET, url),
        None => client.request(
            Method::GET,
            &format!("/drives/{}/root/delta", drive_id.as_str()),
        ),
    };

    let response = request
        .timeout(METADATA_TIMEOUT)
        .send()
        .await
        .map_err(map_transport_error)?;

    if response.status() == StatusCode::GONE {
        return Err(RemoteError::TokenInvalidated);
    }
    if !response.status().is_success() {
        return Err(error_for_response(response).await);
    }

    let raw: GraphDeltaResponse = response
        .json()
        .await
        .map_err(|e| RemoteError::Network(format!("failed to parse delta page: {e}")))?;

    let page = parse_page(raw)?;
    debug!(
        drive = %drive_id,
        changes = page.changes.len(),
        terminal = page.is_terminal(),
        "fetched delta page"
    );
    Ok(page)
}

// ============================================================================
// Tests
// ============================================================================
