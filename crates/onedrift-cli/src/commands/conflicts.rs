//! Conflicts command
//!
//! Lists unresolved conflicts, or every record with its decision
//! history when `--history` is given.

use anyhow::Result;
use clap::Args;

use onedrift_core::domain::ConflictRecord;

use crate::context::AppContext;
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Args)]
pub struct ConflictsCommand {
    /// Include resolved conflicts and their decision history
    #[arg(long)]
    pub history: bool,
}

impl ConflictsCommand {
    pub async fn execute(&self, format: OutputFormat, config: Option<&str>) -> Result<()> {
        let ctx = AppContext::load(config).await?;

        let records = if self.history {
            ctx.store.list_all_conflicts().await?
        } else {
            ctx.store.list_unresolved_conflicts().await?
        };

        if format.is_json() {
            return print_json(&records);
        }

        if records.is_empty() {
            println!("No conflicts.");
            return Ok(());
        }

        for record in &records {
            print_record(record, self.history);
        }
        Ok(())
    }
}

fn print_record(record: &ConflictRecord, with_history: bool) {
    println!(
        "{}  {}  {}  detected {}",
        record.kind,
        record.resolution,
        record.path,
        record.detected_at.format("%Y-%m-%d %H:%M:%S")
    );
    if with_history {
        for decision in &record.history {
            let note = decision.note.as_deref().unwrap_or("");
            println!(
                "    {} -> {} ({}) {}",
                decision.at.format("%Y-%m-%d %H:%M:%S"),
                decision.resolution,
                decision.source,
                note
            );
        }
    }
}
