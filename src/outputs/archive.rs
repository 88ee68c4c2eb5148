//! Archive reader.
//!
//! Recovers the entries of a previously written archive document so new
//! aged-out entries can be merged into it. Reading is best-effort: a missing
//! file is a first run, and an unreadable one is treated as empty (and later
//! recreated) rather than failing the run.

use crate::fetch::parse::parse_rss_entries;
use crate::models::FeedEntry;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Read every entry of the archive at `path`, in document order.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_archive(path: &Path) -> Vec<FeedEntry> {
    let body = match fs::read_to_string(path).await {
        Ok(body) => body,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No archive yet");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "Could not read archive; treating as empty");
            return Vec::new();
        }
    };

    match parse_rss_entries(&body) {
        Ok(entries) => {
            debug!(entries = entries.len(), "Loaded archive");
            entries
        }
        Err(e) => {
            warn!(error = %e, "Archive is not a readable feed; it will be recreated");
            Vec::new()
        }
    }
}
