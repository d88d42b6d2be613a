//! Sync command
//!
//! Runs one full sync cycle and prints the summary. Exit code is
//! non-zero when any action failed or a safety gate tripped.

use anyhow::Result;
use clap::Args;

use onedrift_engine::{CycleOptions, SyncMode, SyncReport};

use crate::context::AppContext;
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Only push local changes; never download or delete locally
    #[arg(long, conflicts_with = "download_only")]
    pub upload_only: bool,

    /// Only pull remote changes; never upload or delete remotely
    #[arg(long)]
    pub download_only: bool,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Override the big-delete safety gate
    #[arg(long)]
    pub force: bool,
}

impl SyncCommand {
    pub async fn execute(&self, format: OutputFormat, config: Option<&str>) -> Result<()> {
        let ctx = AppContext::load(config).await?;
        ctx.install_signal_handler();

        let mode = if self.upload_only {
            SyncMode::UploadOnly
        } else if self.download_only {
            SyncMode::DownloadOnly
        } else {
            SyncMode::Bidirectional
        };
        let opts = CycleOptions {
            mode,
            dry_run: self.dry_run,
            force: self.force,
        };

        let report = ctx.engine.run_cycle(&opts).await?;

        if format.is_json() {
            print_json(&report)?;
        } else {
            print_human(&report);
        }

        if !report.errors.is_empty() {
            anyhow::bail!("{} action(s) failed", report.errors.len());
        }
        Ok(())
    }
}

/// How many detailed error lines to print before summarizing
const MAX_ERROR_LINES: usize = 10;

fn print_human(report: &SyncReport) {
    if report.dry_run {
        println!("Dry run ({} mode) - no changes were made:", report.mode);
    } else if report.is_noop() {
        println!("No changes detected.");
        return;
    }

    let rows: [(&str, u64); 8] = [
        ("folders created", report.folders_created),
        ("downloaded", report.downloaded),
        ("uploaded", report.uploaded),
        ("moved", report.moved),
        ("deleted locally", report.local_deleted),
        ("deleted remotely", report.remote_deleted),
        ("conflicts", report.conflicts),
        ("metadata updates", report.synced_updates),
    ];
    for (label, count) in rows {
        if count > 0 {
            println!("  {label}: {count}");
        }
    }
    if report.bytes_downloaded > 0 {
        println!("  bytes downloaded: {}", report.bytes_downloaded);
    }
    if report.bytes_uploaded > 0 {
        println!("  bytes uploaded: {}", report.bytes_uploaded);
    }
    println!("  duration: {} ms", report.duration_ms);

    if !report.errors.is_empty() {
        println!("{} action(s) failed:", report.errors.len());
        for error in report.errors.iter().take(MAX_ERROR_LINES) {
            println!("  {}: {}", error.path, error.error);
        }
        if report.errors.len() > MAX_ERROR_LINES {
            println!("  ... and {} more", report.errors.len() - MAX_ERROR_LINES);
        }
    }
}
