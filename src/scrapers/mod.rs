//! Primary-source table feed.
//!
//! The primary source publishes its items as an HTML table rather than a
//! feed. Publishing it takes three steps:
//!
//! 1. **Rendering**: obtain the page HTML through a [`PageSource`]
//! 2. **Extraction**: read `table#<id>` into rows ([`table::extract_table`])
//! 3. **Publishing**: turn rows into entries and run the same recent/archive
//!    split as the aggregated feeds
//!
//! A render or extraction failure is returned as an error before anything is
//! written, so the previously published feed stays in place. A table with
//! zero rows still publishes a valid, empty recent document.
//!
//! # Submodules
//!
//! - [`page`]: The [`PageSource`] seam and its HTTP implementation
//! - [`table`]: Table extraction, row interpretation and entry construction

pub mod page;
pub mod table;

use crate::config::TableFeedConfig;
use crate::retention::{FeedSettings, PublishSummary, publish_split};
use crate::snapshot::{SNAPSHOT_FILE, load_snapshot, save_snapshot};
use crate::utils::OutputPaths;
use chrono::{DateTime, Utc};
pub use page::{HttpPageSource, PageSource};
use std::error::Error;
use std::path::Path;
use table::{TableRow, extract_table, to_entries};
use tracing::{error, info, instrument, warn};

/// Result of one table feed run.
#[derive(Debug, Clone, PartialEq)]
pub struct TableFeedReport {
    pub rows: usize,
    pub changed: bool,
    pub publish: PublishSummary,
}

async fn scrape_rows<P: PageSource>(
    table: &TableFeedConfig,
    source: &P,
) -> Result<Vec<TableRow>, Box<dyn Error>> {
    let html = source.render(&table.url).await.map_err(|e| {
        error!(url = %table.url, error = %e, "Failed to render table page");
        format!("rendering {}: {e}", table.url)
    })?;
    let rows = extract_table(&html, &table.table_id).inspect_err(|e| {
        error!(error = %e, "Table extraction failed");
    })?;
    Ok(rows)
}

/// Scrape the table source and publish its feed.
///
/// # Arguments
///
/// * `table` - Page URL, table id, output and window
/// * `output_dir` - Directory outputs and the snapshot are resolved under
/// * `source` - How the page is rendered
/// * `now` - Reference time for undated rows, retention and the snapshot
///
/// # Returns
///
/// A [`TableFeedReport`], or the error that prevented rendering the page,
/// finding the table, or writing the recent document.
#[instrument(level = "info", skip_all, fields(url = %table.url, table_id = %table.table_id))]
pub async fn publish_table_feed<P: PageSource>(
    table: &TableFeedConfig,
    output_dir: &Path,
    source: &P,
    now: DateTime<Utc>,
) -> Result<TableFeedReport, Box<dyn Error>> {
    let rows = scrape_rows(table, source).await?;

    let snapshot_path = output_dir.join(SNAPSHOT_FILE);
    let previous = load_snapshot(&snapshot_path).await;
    let changed = previous.has_changed(&rows);
    if changed {
        info!(rows = rows.len(), previous = previous.data.len(), "Changes detected in table source");
    } else {
        info!(rows = rows.len(), "No changes in table source");
    }
    if rows.is_empty() {
        warn!("Table has no rows; keeping previous snapshot");
    } else if let Err(e) = save_snapshot(&snapshot_path, &rows, now).await {
        warn!(error = %e, "Failed to save snapshot");
    }

    let entries = to_entries(&rows, &table.url, &table.link, now);
    let paths = OutputPaths::resolve(output_dir, &table.output);
    let publish = publish_split(&paths, &FeedSettings::from(table), entries, now).await?;

    Ok(TableFeedReport {
        rows: rows.len(),
        changed,
        publish,
    })
}
