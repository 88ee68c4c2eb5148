//! Persisted fetch cache.
//!
//! The cache is the only state carried between runs. It holds one
//! [`SourceRecord`] per source URL (conditional-request validators, failure
//! bookkeeping, skip status) and the last request time per hostname used for
//! per-domain pacing.
//!
//! The file is loaded once when a run starts and saved once when it ends.
//! A missing or unreadable file yields an empty cache; deleting the file
//! returns every source to a clean state.

use crate::models::SourceRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// In-memory form of the cache file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchCache {
    /// Keyed by source URL.
    pub sources: BTreeMap<String, SourceRecord>,
    /// Last request time, keyed by hostname.
    pub domains: BTreeMap<String, DateTime<Utc>>,
}

impl FetchCache {
    pub fn record(&self, url: &str) -> Option<&SourceRecord> {
        self.sources.get(url)
    }

    /// The record for `url`, created on first use.
    pub fn record_mut(&mut self, url: &str) -> &mut SourceRecord {
        self.sources.entry(url.to_string()).or_default()
    }

    /// Consecutive failures recorded for `url`, zero for unknown sources.
    pub fn failures(&self, url: &str) -> u32 {
        self.record(url).map_or(0, |r| r.consecutive_failures)
    }

    pub fn last_request(&self, host: &str) -> Option<DateTime<Utc>> {
        self.domains.get(host).copied()
    }

    pub fn mark_request(&mut self, host: &str, at: DateTime<Utc>) {
        self.domains.insert(host.to_string(), at);
    }

    /// URLs of every source currently marked skipped, in key order.
    pub fn skipped_sources(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|(_, r)| r.skipped)
            .map(|(url, _)| url.clone())
            .collect()
    }
}

/// Load the cache from `path`.
///
/// Never fails: a missing file is a first run, and a corrupt one is logged
/// and replaced by an empty cache.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load(path: &Path) -> FetchCache {
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No fetch cache yet; starting empty");
            return FetchCache::default();
        }
        Err(e) => {
            warn!(error = %e, "Could not read fetch cache; starting empty");
            return FetchCache::default();
        }
    };

    match serde_json::from_str::<FetchCache>(&content) {
        Ok(cache) => {
            debug!(
                sources = cache.sources.len(),
                domains = cache.domains.len(),
                "Loaded fetch cache"
            );
            cache
        }
        Err(e) => {
            warn!(error = %e, "Fetch cache is corrupt; starting empty");
            FetchCache::default()
        }
    }
}

/// Save the cache to `path` as pretty JSON, serialized fully before writing.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn save(path: &Path, cache: &FetchCache) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(cache)?;
    crate::utils::ensure_parent_dir(path).await?;
    fs::write(path, json).await?;
    info!(sources = cache.sources.len(), "Saved fetch cache");
    Ok(())
}
