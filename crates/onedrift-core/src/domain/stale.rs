//! Stale file records
//!
//! When the active filter set excludes a path that is still present in
//! the baseline, the engine never deletes anything on its own. Instead it
//! records the path here and leaves it for the operator to review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::drive::{DriveId, ItemId};

/// A baseline item excluded by the current filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleRecord {
    pub drive_id: DriveId,
    pub item_id: ItemId,
    pub path: String,
    pub detected_at: DateTime<Utc>,
    /// Which filter excluded the path, e.g. `skip_dirs: "node_modules"`
    pub reason: String,
}

impl StaleRecord {
    /// Create a stale record detected now
    #[must_use]
    pub fn new(
        drive_id: DriveId,
        item_id: ItemId,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            drive_id,
            item_id,
            path: path.into(),
            detected_at: Utc::now(),
            reason: reason.into(),
        }
    }
}
