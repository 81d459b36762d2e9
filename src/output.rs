//! Result rendering
//!
//! Writes the discovered ARN set as JSON, CSV or plain text and formats the
//! run summary.

use crate::arn::Arn;
use crate::scan::ScanOutcome;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON array of ARNs
    #[default]
    Json,
    /// One row per ARN, split into its fields
    Csv,
    /// One ARN per line
    Text,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

/// Output path when none was given: the configured file, with its extension
/// matched to the format.
pub fn default_output_path(configured: &str, format: OutputFormat) -> PathBuf {
    Path::new(configured).with_extension(format.extension())
}

pub fn render(arns: &BTreeSet<String>, format: OutputFormat, pretty: bool) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut out = if pretty {
                serde_json::to_string_pretty(arns)?
            } else {
                serde_json::to_string(arns)?
            };
            out.push('\n');
            Ok(out)
        }
        OutputFormat::Csv => render_csv(arns),
        OutputFormat::Text => Ok(arns.iter().map(|arn| format!("{}\n", arn)).collect()),
    }
}

fn render_csv(arns: &BTreeSet<String>) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["arn", "partition", "service", "region", "account", "resource"])?;
    for raw in arns {
        match Arn::parse(raw) {
            Some(arn) => writer.write_record([
                raw.as_str(),
                arn.partition,
                arn.service,
                arn.region,
                arn.account,
                arn.resource,
            ])?,
            None => writer.write_record([raw.as_str(), "", "", "", "", ""])?,
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// Write the rendered set to `path`, creating parent directories.
pub fn write_output(
    path: &Path,
    arns: &BTreeSet<String>,
    format: OutputFormat,
    pretty: bool,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let content = render(arns, format, pretty)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Human-readable run summary
pub fn summary(outcome: &ScanOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Account:        {}", outcome.account_id);
    let _ = writeln!(out, "Resources:      {}", outcome.arns.len());
    let _ = writeln!(
        out,
        "Tasks:          {}/{} completed",
        outcome.tasks_completed, outcome.tasks_total
    );
    if outcome.skipped > 0 {
        let _ = writeln!(out, "Skipped:        {}", outcome.skipped);
    }
    if outcome.cancelled {
        let _ = writeln!(out, "Scan was cancelled; results are partial");
    }
    if !outcome.failures.is_empty() {
        let _ = writeln!(out, "Failed tasks:   {}", outcome.failures.len());
        for (kind, count) in outcome.failures_by_kind() {
            let _ = writeln!(out, "  {:<14}{}", kind.as_str(), count);
        }
    }

    let mut per_service: std::collections::BTreeMap<&str, usize> = Default::default();
    for arn in outcome.arns.iter().filter_map(|a| Arn::parse(a)) {
        *per_service.entry(arn.service).or_insert(0) += 1;
    }
    if !per_service.is_empty() {
        let _ = writeln!(out, "By service:");
        for (service, count) in per_service {
            let _ = writeln!(out, "  {:<24}{}", service, count);
        }
    }
    out
}
