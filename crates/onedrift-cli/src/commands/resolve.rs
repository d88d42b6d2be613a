//! Resolve command
//!
//! Applies an operator decision to a conflicted path: `--keep-local`
//! restores the preserved local bytes (the next sync uploads them),
//! `--keep-remote` keeps the downloaded remote version and discards the
//! conflict copy. `--all` applies the chosen strategy to every
//! unresolved conflict.

use anyhow::Result;
use clap::Args;

use onedrift_core::domain::{ConflictRecord, Resolution, ResolutionSource};

use crate::context::AppContext;
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct ResolveCommand {
    /// Path of the conflicted file (relative to the sync root)
    #[arg(required_unless_present = "all")]
    pub path: Option<String>,

    /// Keep the local version; it re-uploads on the next sync
    #[arg(long, conflicts_with = "keep_remote")]
    pub keep_local: bool,

    /// Keep the remote version; the conflict copy is removed
    #[arg(long)]
    pub keep_remote: bool,

    /// Apply to every unresolved conflict
    #[arg(long)]
    pub all: bool,
}

impl ResolveCommand {
    pub async fn execute(&self, _format: OutputFormat, config: Option<&str>) -> Result<()> {
        let resolution = if self.keep_local {
            Resolution::KeepLocal
        } else if self.keep_remote {
            Resolution::KeepRemote
        } else {
            anyhow::bail!("choose a strategy: --keep-local or --keep-remote");
        };

        let ctx = AppContext::load(config).await?;

        let records: Vec<ConflictRecord> = if self.all {
            ctx.store.list_unresolved_conflicts().await?
        } else {
            let path = self.path.as_deref().expect("clap enforces path without --all");
            match ctx
                .store
                .find_unresolved_conflict(&ctx.drive_id, path)
                .await?
            {
                Some(record) => vec![record],
                None => anyhow::bail!("no unresolved conflict on '{path}'"),
            }
        };

        if records.is_empty() {
            println!("No unresolved conflicts.");
            return Ok(());
        }

        let mut failures = 0usize;
        for mut record in records {
            let target = ctx.sync_root.join(&record.path);
            match onedrift_conflict::apply_resolution(&target, resolution).await {
                Ok(outcome) => {
                    record.resolve(resolution, ResolutionSource::User, None);
                    ctx.store.save_conflict(&record).await?;
                    let what = match outcome {
                        onedrift_conflict::ResolutionOutcome::LocalRestored { .. } => {
                            "local version restored, will re-upload"
                        }
                        onedrift_conflict::ResolutionOutcome::RemoteKept { .. } => {
                            "remote version kept"
                        }
                    };
                    println!("{}: {} ({what})", record.path, resolution);
                }
                Err(e) => {
                    failures += 1;
                    eprintln!("{}: failed to apply {resolution}: {e}", record.path);
                }
            }
        }

        if failures > 0 {
            anyhow::bail!("{failures} conflict(s) could not be resolved");
        }
        Ok(())
    }
}
