//! Shared command wiring
//!
//! Every command needs the same setup: configuration, the state store,
//! the session store, an authenticated remote client, and the engine.
//! [`AppContext::load`] builds all of it once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use onedrift_core::config::Config;
use onedrift_core::domain::{CanonicalDriveId, DriveId};
use onedrift_engine::SyncEngine;
use onedrift_graph::{GraphClient, GraphRemoteClient};
use onedrift_state::{DiskSessionStore, StatePool, StateStore};

/// Stored OAuth tokens, written by the external auth tooling
///
/// Only the access token is consumed here; refresh handling happens
/// outside this binary.
#[derive(Debug, Deserialize)]
struct TokenFile {
    access_token: String,
}

/// Everything a command needs to run against one drive
pub struct AppContext {
    pub drive_id: DriveId,
    pub store: Arc<StateStore>,
    pub engine: SyncEngine,
    pub cancel: CancellationToken,
    pub sync_root: PathBuf,
}

impl AppContext {
    /// Load configuration and wire up the full stack
    pub async fn load(config_override: Option<&str>) -> Result<Self> {
        let config_path = config_override
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_path);
        let config = Config::load_or_default(&config_path);
        debug!(path = %config_path.display(), "loaded configuration");

        if config.drive.canonical.is_empty() || config.drive.id.is_empty() {
            anyhow::bail!(
                "no drive configured; set drive.canonical and drive.id in {}",
                config_path.display()
            );
        }

        let canonical: CanonicalDriveId = config
            .drive
            .canonical
            .parse()
            .with_context(|| format!("invalid drive.canonical '{}'", config.drive.canonical))?;
        let drive_id = DriveId::new(&config.drive.id);
        if drive_id.is_zero() {
            anyhow::bail!("drive.id must not be empty");
        }

        let data_dir = Config::default_data_dir();
        let pool = StatePool::open(&data_dir.join("state.db"))
            .await
            .context("failed to open state database")?;
        let store = Arc::new(StateStore::new(&pool));
        let sessions =
            Arc::new(DiskSessionStore::open(&data_dir).context("failed to open session store")?);

        let access_token = load_access_token(&data_dir, &canonical)?;
        let remote = Arc::new(GraphRemoteClient::new(GraphClient::new(access_token)));

        let cancel = CancellationToken::new();
        let sync_root = config.sync.root.clone();
        let engine = SyncEngine::new(
            drive_id.clone(),
            remote,
            store.clone(),
            sessions,
            sync_root.clone(),
            config.clone(),
            cancel.clone(),
        );

        info!(drive = %canonical, root = %sync_root.display(), "context ready");
        Ok(Self {
            drive_id,
            store,
            engine,
            cancel,
            sync_root,
        })
    }

    /// Cancel the running cycle on Ctrl-C
    pub fn install_signal_handler(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling; partial transfers are kept");
                cancel.cancel();
            }
        });
    }
}

/// Read the access token for a drive from its token file
///
/// Token files are written by the auth tooling as
/// `token_{type}_{email}.json` with mode 0600.
fn load_access_token(data_dir: &Path, canonical: &CanonicalDriveId) -> Result<String> {
    let token_path = data_dir.join(canonical.token_file_name());
    let content = std::fs::read_to_string(&token_path).with_context(|| {
        format!(
            "no token file at {}; authenticate first",
            token_path.display()
        )
    })?;
    let token: TokenFile = serde_json::from_str(&content)
        .with_context(|| format!("malformed token file {}", token_path.display()))?;
    if token.access_token.is_empty() {
        anyhow::bail!("token file {} holds an empty token", token_path.display());
    }
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use onedrift_core::domain::Email;

    #[test]
    fn test_load_access_token() {
        let dir = tempfile::tempdir().unwrap();
        let canonical =
            CanonicalDriveId::personal(Email::new("user@example.com").unwrap());
        std::fs::write(
            dir.path().join("token_personal_user@example.com.json"),
            r#"{"access_token": "tok-123", "refresh_token": "ignored"}"#,
        )
        .unwrap();

        let token = load_access_token(dir.path(), &canonical).unwrap();
        assert_eq!(token, "tok-123");
    }

    #[test]
    fn test_missing_token_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let canonical =
            CanonicalDriveId::personal(Email::new("user@example.com").unwrap());
        assert!(load_access_token(dir.path(), &canonical).is_err());
    }
}
