//! Source health artifacts.
//!
//! Each aggregation run produces, next to its recent feed:
//!
//! - `<stem>_health.json`: totals, per-classification counts, per-source details
//!   and prune candidates
//! - `<stem>_health.md`: the same data as a Markdown report
//!
//! After all targets have run, a global `skipped_sources.json` lists every
//! source currently marked skipped in the fetch cache.
//!
//! Prune candidates are advisory only: sources are never removed from the
//! configuration automatically.

use crate::cache::FetchCache;
use crate::fetch::FetchOutcome;
use crate::models::{Classification, LastStatus, SourceRecord};
use crate::utils::{OutputPaths, ensure_parent_dir, truncate_for_log};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Write};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

const LAST_ERROR_EXCERPT: usize = 300;

/// How one source ended in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Fetched with at least one item.
    Ok,
    /// Fetched and healthy, but without items.
    Empty,
    NotModified,
    Skipped,
    Failed,
}

impl SourceStatus {
    fn from_outcome(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Items(items) if items.is_empty() => SourceStatus::Empty,
            FetchOutcome::Items(_) => SourceStatus::Ok,
            FetchOutcome::NotModified => SourceStatus::NotModified,
            FetchOutcome::Skipped => SourceStatus::Skipped,
            FetchOutcome::Failed { .. } => SourceStatus::Failed,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Ok => "ok",
            SourceStatus::Empty => "empty",
            SourceStatus::NotModified => "not_modified",
            SourceStatus::Skipped => "skipped",
            SourceStatus::Failed => "failed",
        }
    }
}

/// Per-source line of the health summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub url: String,
    pub status: SourceStatus,
    pub classification: Option<Classification>,
    pub consecutive_failures: u32,
    pub items: usize,
    pub last_status: Option<LastStatus>,
    pub last_error: Option<String>,
    /// Failing before this run, clean after it.
    pub recovered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PruneCandidate {
    pub url: String,
    pub consecutive_failures: u32,
    pub classification: Option<Classification>,
    pub reason: String,
}

/// Health summary of one aggregation target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub feed: String,
    pub total_sources: usize,
    pub attempted: usize,
    pub skipped: usize,
    pub with_items: usize,
    pub failures: usize,
    pub recovered: usize,
    pub classification_counts: BTreeMap<String, usize>,
    pub details: Vec<SourceHealth>,
    pub prune_candidates: Vec<PruneCandidate>,
}

impl HealthReport {
    pub fn new(feed: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            feed: feed.to_string(),
            total_sources: 0,
            attempted: 0,
            skipped: 0,
            with_items: 0,
            failures: 0,
            recovered: 0,
            classification_counts: BTreeMap::new(),
            details: Vec::new(),
            prune_candidates: Vec::new(),
        }
    }

    /// Record one source fetch.
    ///
    /// # Arguments
    ///
    /// * `url` - The source URL
    /// * `outcome` - What the fetcher returned
    /// * `record` - The source's cache record after the fetch
    /// * `failures_before` - `consecutive_failures` before the fetch
    pub fn record(
        &mut self,
        url: &str,
        outcome: &FetchOutcome,
        record: Option<&SourceRecord>,
        failures_before: u32,
    ) {
        let status = SourceStatus::from_outcome(outcome);
        let consecutive_failures = record.map_or(0, |r| r.consecutive_failures);
        let recovered = failures_before > 0 && consecutive_failures == 0;

        self.total_sources += 1;
        match status {
            SourceStatus::Skipped => self.skipped += 1,
            _ => self.attempted += 1,
        }
        if status == SourceStatus::Ok {
            self.with_items += 1;
        }
        if status == SourceStatus::Failed {
            self.failures += 1;
        }
        if recovered {
            self.recovered += 1;
        }

        self.details.push(SourceHealth {
            url: url.to_string(),
            status,
            classification: record.and_then(|r| r.last_classification),
            consecutive_failures,
            items: outcome.item_count(),
            last_status: record.and_then(|r| r.last_status.clone()),
            last_error: record
                .and_then(|r| r.last_error.as_deref())
                .map(|e| truncate_for_log(e, LAST_ERROR_EXCERPT)),
            recovered,
        });
    }

    /// Derive classification counts and prune candidates from the details.
    pub fn finish(&mut self, prune_threshold: u32) {
        self.classification_counts = self
            .details
            .iter()
            .filter_map(|d| d.classification)
            .counts_by(|c| c.as_str().to_string())
            .into_iter()
            .collect();
        self.prune_candidates = prune_candidates(&self.details, prune_threshold);
    }
}

/// Sources recommended for removal: a permanent failure class (DNS/TLS) with
/// at least one consecutive failure, or `prune_threshold` failures in a row.
pub fn prune_candidates(details: &[SourceHealth], prune_threshold: u32) -> Vec<PruneCandidate> {
    details
        .iter()
        .filter_map(|d| {
            let permanent = d.classification.is_some_and(|c| c.is_permanent());
            let reason = if permanent && d.consecutive_failures >= 1 {
                format!(
                    "{} on {} consecutive fetch(es)",
                    d.classification.map_or("", |c| c.as_str()),
                    d.consecutive_failures
                )
            } else if prune_threshold > 0 && d.consecutive_failures >= prune_threshold {
                format!(
                    "{} consecutive failures (threshold {prune_threshold})",
                    d.consecutive_failures
                )
            } else {
                return None;
            };
            Some(PruneCandidate {
                url: d.url.clone(),
                consecutive_failures: d.consecutive_failures,
                classification: d.classification,
                reason,
            })
        })
        .collect()
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render the Markdown health report.
pub fn render_markdown(report: &HealthReport) -> Result<String, fmt::Error> {
    let mut md = String::new();

    writeln!(md, "# Feed Health: {}\n", report.feed)?;
    writeln!(md, "Generated: {}\n", report.generated_at.to_rfc3339())?;

    writeln!(md, "| Metric | Count |")?;
    writeln!(md, "|---|---|")?;
    for (label, value) in [
        ("Total sources", report.total_sources),
        ("Attempted", report.attempted),
        ("Skipped", report.skipped),
        ("With items", report.with_items),
        ("Failures", report.failures),
        ("Recovered", report.recovered),
    ] {
        writeln!(md, "| {label} | {value} |")?;
    }

    if !report.classification_counts.is_empty() {
        writeln!(md, "\n## Classifications\n")?;
        for (classification, count) in &report.classification_counts {
            writeln!(md, "- `{classification}`: {count}")?;
        }
    }

    writeln!(md, "\n## Sources\n")?;
    writeln!(
        md,
        "| Source | Status | Classification | Failures | Items | Last status | Last error |"
    )?;
    writeln!(md, "|---|---|---|---|---|---|---|")?;
    for d in &report.details {
        writeln!(
            md,
            "| {} | {}{} | {} | {} | {} | {} | {} |",
            cell(&d.url),
            d.status.as_str(),
            if d.recovered { " (recovered)" } else { "" },
            d.classification.map_or("-", |c| c.as_str()),
            d.consecutive_failures,
            d.items,
            d.last_status.as_ref().map_or("-".to_string(), |s| s.to_string()),
            cell(d.last_error.as_deref().unwrap_or("-")),
        )?;
    }

    writeln!(md, "\n## Prune Candidates\n")?;
    if report.prune_candidates.is_empty() {
        writeln!(md, "None")?;
    } else {
        for p in &report.prune_candidates {
            writeln!(md, "- {}: {}", cell(&p.url), p.reason)?;
        }
    }

    Ok(md)
}

/// Write both health artifacts for one target.
#[instrument(level = "info", skip_all, fields(feed = %report.feed))]
pub async fn write_health(paths: &OutputPaths, report: &HealthReport) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let markdown = render_markdown(report)?;

    ensure_parent_dir(&paths.health_json).await?;
    fs::write(&paths.health_json, json).await?;
    fs::write(&paths.health_markdown, markdown).await?;
    info!(
        path = %paths.health_json.display(),
        prune_candidates = report.prune_candidates.len(),
        "Wrote health report"
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct SkippedSources<'a> {
    generated_at: DateTime<Utc>,
    count: usize,
    sources: &'a [String],
}

/// Write the global list of currently-skipped sources.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_skipped_sources(
    path: &Path,
    cache: &FetchCache,
    generated_at: DateTime<Utc>,
) -> Result<(), Box<dyn Error>> {
    let sources = cache.skipped_sources();
    let json = serde_json::to_string_pretty(&SkippedSources {
        generated_at,
        count: sources.len(),
        sources: &sources,
    })?;
    ensure_parent_dir(path).await?;
    fs::write(path, json).await?;
    info!(count = sources.len(), "Wrote skipped sources list");
    Ok(())
}
