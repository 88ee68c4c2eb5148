//! Fingerprinting, deduplication and the recent/archive split.
//!
//! Every feed this crate publishes goes through [`publish_split`]:
//!
//! 1. Entries are deduplicated by guid (last value wins, first position kept).
//! 2. Entries published on or after `today - retention_days` are recent; the
//!    rest have aged out.
//! 3. The recent partition is ranked newest first and truncated to
//!    `max_items`. Entries cut by the truncation are dropped, not archived.
//! 4. The recent document is written, replacing the previous one.
//! 5. Aged-out entries whose guid is not yet archived are appended to the
//!    archive. Existing archive entries are kept verbatim and in order; the
//!    archive file is rewritten only when something was added.
//!
//! A failure writing the recent document is returned to the caller. Archive
//! failures are logged and swallowed.

use crate::config::{AggregationTarget, TableFeedConfig};
use crate::models::{AggregatedEntry, FeedEntry, FeedItem, FeedMetadata, SourceAttribution};
use crate::outputs::archive::read_archive;
use crate::outputs::feed::write_feed;
use crate::utils::OutputPaths;
use chrono::{DateTime, Days, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use tracing::{error, info, instrument};

/// Deterministic identifier of a logical item: SHA-256 (hex) of
/// `title|link|published-rfc3339`.
pub fn fingerprint(title: &str, link: &str, published: DateTime<Utc>) -> String {
    let key = format!("{title}|{link}|{}", published.to_rfc3339());
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Turn a fetched item into an aggregated entry.
///
/// The guid is computed before attribution, so changing the attribution mode
/// does not change guids.
pub fn to_entry(item: &FeedItem, attribution: SourceAttribution) -> AggregatedEntry {
    let guid = fingerprint(&item.title, &item.link, item.published);
    let (title, description) = attribution.apply(&item.title, &item.description, &item.source_host);
    AggregatedEntry {
        guid,
        title,
        link: item.link.clone(),
        description,
        published: item.published,
    }
}

/// Collapse entries sharing a guid. The surviving entry sits where the guid
/// was first seen and carries the last-seen values.
pub fn dedupe_by_guid(entries: Vec<AggregatedEntry>) -> Vec<AggregatedEntry> {
    let mut out: Vec<AggregatedEntry> = Vec::with_capacity(entries.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        match index.get(&entry.guid) {
            Some(&i) => out[i] = entry,
            None => {
                index.insert(entry.guid.clone(), out.len());
                out.push(entry);
            }
        }
    }
    out
}

/// First day that still counts as recent.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> NaiveDate {
    now.date_naive()
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub recent: Vec<AggregatedEntry>,
    pub aged_out: Vec<AggregatedEntry>,
}

/// Split entries by publication date. The comparison is by calendar day and
/// the cutoff day itself is recent.
pub fn partition(entries: Vec<AggregatedEntry>, now: DateTime<Utc>, retention_days: u32) -> Partition {
    let cutoff = retention_cutoff(now, retention_days);
    let (recent, aged_out): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|e| e.published.date_naive() >= cutoff);
    Partition { recent, aged_out }
}

/// Newest first, at most `max_items`. Returns the kept entries and how many
/// were dropped.
pub fn rank_and_truncate(
    mut recent: Vec<AggregatedEntry>,
    max_items: usize,
) -> (Vec<AggregatedEntry>, usize) {
    recent.sort_by(|a, b| b.published.cmp(&a.published));
    let dropped = recent.len().saturating_sub(max_items);
    recent.truncate(max_items);
    (recent, dropped)
}

/// Append aged-out entries not yet present in `existing`.
///
/// Returns the merged list and the number of entries added.
pub fn merge_archive(
    mut existing: Vec<FeedEntry>,
    aged_out: &[AggregatedEntry],
) -> (Vec<FeedEntry>, usize) {
    let mut seen: HashSet<String> = existing.iter().map(|e| e.guid.clone()).collect();
    let before = existing.len();
    for entry in aged_out {
        if seen.insert(entry.guid.clone()) {
            existing.push(entry.to_feed_entry());
        }
    }
    let added = existing.len() - before;
    (existing, added)
}

/// Channel metadata and window of one published feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub title: String,
    pub link: String,
    pub description: String,
    pub retention_days: u32,
    pub max_items: usize,
}

impl FeedSettings {
    fn generator(kind: &str) -> String {
        format!("rolling_rss {} ({kind})", env!("CARGO_PKG_VERSION"))
    }

    pub fn recent_metadata(&self) -> FeedMetadata {
        FeedMetadata {
            title: self.title.clone(),
            link: self.link.clone(),
            description: self.description.clone(),
            language: "en-us".to_string(),
            generator: Self::generator("retention"),
        }
    }

    pub fn archive_metadata(&self) -> FeedMetadata {
        FeedMetadata {
            title: format!("{} (Archive)", self.title),
            link: self.link.clone(),
            description: format!(
                "Archived items older than {} days from {}",
                self.retention_days, self.title
            ),
            language: "en-us".to_string(),
            generator: Self::generator("archive"),
        }
    }
}

impl From<&AggregationTarget> for FeedSettings {
    fn from(target: &AggregationTarget) -> Self {
        Self {
            title: target.title.clone(),
            link: target.link.clone(),
            description: target.description.clone(),
            retention_days: target.retention_days,
            max_items: target.max_items,
        }
    }
}

impl From<&TableFeedConfig> for FeedSettings {
    fn from(table: &TableFeedConfig) -> Self {
        Self {
            title: table.title.clone(),
            link: table.link.clone(),
            description: table.description.clone(),
            retention_days: table.retention_days,
            max_items: table.max_items,
        }
    }
}

/// What one [`publish_split`] call wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub recent: usize,
    /// Recent-window entries cut by `max_items`.
    pub dropped: usize,
    pub aged_out: usize,
    pub archive_added: usize,
    pub archive_total: usize,
    pub archive_written: bool,
}

/// Publish `entries` as a recent document plus archive.
///
/// # Arguments
///
/// * `paths` - Where the recent document and archive live
/// * `settings` - Channel metadata, retention window and item cap
/// * `entries` - All entries gathered this run, in iteration order
/// * `now` - Reference time for the retention cutoff and `lastBuildDate`
///
/// # Returns
///
/// A [`PublishSummary`], or the error that prevented writing the recent document.
#[instrument(level = "info", skip_all, fields(recent = %paths.recent.display()))]
pub async fn publish_split(
    paths: &OutputPaths,
    settings: &FeedSettings,
    entries: Vec<AggregatedEntry>,
    now: DateTime<Utc>,
) -> Result<PublishSummary, Box<dyn Error>> {
    let entries = dedupe_by_guid(entries);
    let Partition { recent, aged_out } = partition(entries, now, settings.retention_days);
    let (recent, dropped) = rank_and_truncate(recent, settings.max_items);

    let recent_entries: Vec<FeedEntry> = recent.iter().map(AggregatedEntry::to_feed_entry).collect();
    write_feed(&paths.recent, &settings.recent_metadata(), &recent_entries, now).await?;

    let mut summary = PublishSummary {
        recent: recent_entries.len(),
        dropped,
        aged_out: aged_out.len(),
        ..PublishSummary::default()
    };

    if !aged_out.is_empty() {
        let existing = read_archive(&paths.archive).await;
        let (merged, added) = merge_archive(existing, &aged_out);
        summary.archive_added = added;
        summary.archive_total = merged.len();
        if added > 0 {
            match write_feed(&paths.archive, &settings.archive_metadata(), &merged, now).await {
                Ok(()) => summary.archive_written = true,
                Err(e) => error!(
                    path = %paths.archive.display(),
                    error = %e,
                    "Failed to write archive; recent feed is unaffected"
                ),
            }
        }
    }

    info!(
        recent = summary.recent,
        dropped = summary.dropped,
        aged_out = summary.aged_out,
        archive_added = summary.archive_added,
        "Published feed"
    );
    Ok(summary)
}
