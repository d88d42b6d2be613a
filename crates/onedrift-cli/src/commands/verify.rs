//! Verify command
//!
//! Re-hashes every converged file and compares against the baseline's
//! last-converged hash. Exit code is non-zero on any mismatch.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::context::AppContext;
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Args)]
pub struct VerifyCommand {}

#[derive(Debug, Serialize)]
struct VerifyJson {
    checked: u64,
    mismatched: Vec<String>,
    missing: Vec<String>,
    ok: bool,
}

impl VerifyCommand {
    pub async fn execute(&self, format: OutputFormat, config: Option<&str>) -> Result<()> {
        let ctx = AppContext::load(config).await?;
        let report = ctx.engine.verify().await?;

        if format.is_json() {
            print_json(&VerifyJson {
                checked: report.checked,
                mismatched: report.mismatched.clone(),
                missing: report.missing.clone(),
                ok: report.is_clean(),
            })?;
        } else if report.is_clean() {
            println!("Verified, all files verified successfully. ({} checked)", report.checked);
        } else {
            for path in &report.mismatched {
                println!("MISMATCH  {path}");
            }
            for path in &report.missing {
                println!("MISSING   {path}");
            }
        }

        if !report.is_clean() {
            anyhow::bail!(
                "{} file(s) failed verification",
                report.mismatched.len() + report.missing.len()
            );
        }
        Ok(())
    }
}
