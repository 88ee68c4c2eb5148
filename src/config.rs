//! Configuration for feed targets and the fetch policy.
//!
//! The configuration is a YAML document loaded once at startup into immutable
//! values that are passed explicitly to the aggregation engine and the fetcher.
//!
//! ```yaml
//! output_dir: "_site"
//! fetch_policy:
//!   min_delay: 1.0
//!   max_delay: 3.0
//!   retry_attempts: 3
//! table_feed:
//!   url: "https://gaiinsights.com/ratings"
//!   table_id: "newsTable"
//!   output: "ai_rss_feed.xml"
//!   title: "AI News"
//!   link: "https://rss.example.org/"
//!   description: "Latest AI news and ratings"
//! aggregated_feeds:
//!   - key: external
//!     output: "/aggregated_external.xml"
//!     title: "External AI News"
//!     link: "https://rss.example.org/"
//!     description: "Aggregated from external feeds"
//!     source_attribution: title
//!     sources:
//!       - "https://example.com/feed.xml"
//! ```
//!
//! # Fast mode
//!
//! Setting `ROLLING_RSS_FAST=1` (or passing `--fast`) swaps the fetch policy
//! for [`FetchPolicy::fast`], which removes every politeness delay. It exists
//! for tests and local runs and must not be used against real sources.

use crate::models::SourceAttribution;
use serde::Deserialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Environment toggle for [`FetchPolicy::fast`].
pub const FAST_MODE_ENV: &str = "ROLLING_RSS_FAST";

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory all feed outputs are resolved under.
    pub output_dir: PathBuf,
    /// Fetch cache location, relative to the working directory.
    pub cache_path: PathBuf,
    /// Global list of currently-skipped sources, relative to `output_dir`.
    pub skipped_sources_path: PathBuf,
    /// Consecutive failures at which a source is recommended for removal.
    pub prune_threshold: u32,
    pub fetch_policy: FetchPolicy,
    pub table_feed: Option<TableFeedConfig>,
    pub aggregated_feeds: Vec<AggregationTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            cache_path: PathBuf::from(".feed_cache.json"),
            skipped_sources_path: PathBuf::from("skipped_sources.json"),
            prune_threshold: 3,
            fetch_policy: FetchPolicy::default(),
            table_feed: None,
            aggregated_feeds: Vec::new(),
        }
    }
}

/// Politeness and retry parameters for fetching external feeds.
///
/// Delays are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    /// Lower bound of the unconditional random delay before each fetch.
    pub min_delay: f64,
    /// Upper bound of the unconditional random delay before each fetch.
    pub max_delay: f64,
    /// Attempts per fetch, at least 1.
    pub retry_attempts: u32,
    /// Backoff before attempt `n + 1` is `retry_backoff_base^(n - 1)` seconds.
    /// A base of zero or less disables the backoff sleep.
    pub retry_backoff_base: f64,
    /// Upper bound of the random jitter added to each backoff.
    #[serde(alias = "retry_jitter_max")]
    pub retry_jitter: f64,
    /// Minimum spacing between two requests to the same host.
    pub per_domain_min_interval: f64,
    /// Per-request timeout.
    #[serde(alias = "timeout_seconds")]
    pub timeout: f64,
    /// Consecutive failures after which a source is skipped without a request.
    pub skip_after_failures: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            min_delay: 1.0,
            max_delay: 3.0,
            retry_attempts: 3,
            retry_backoff_base: 2.0,
            retry_jitter: 0.5,
            per_domain_min_interval: 5.0,
            timeout: 20.0,
            skip_after_failures: 5,
        }
    }
}

impl FetchPolicy {
    /// Near-zero delays for tests and local runs. Timeout, attempts and the
    /// skip threshold are kept from `self`.
    pub fn fast(&self) -> Self {
        Self {
            min_delay: 0.0,
            max_delay: 0.0,
            retry_backoff_base: 0.0,
            retry_jitter: 0.0,
            per_domain_min_interval: 0.0,
            ..self.clone()
        }
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout)
    }

    pub fn per_domain_interval(&self) -> Duration {
        secs(self.per_domain_min_interval)
    }

    pub fn attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }
}

/// Convert seconds into a `Duration`. Negative and NaN values give zero,
/// values too large to represent (infinity included) give `Duration::MAX`.
pub fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// One aggregated output: a set of external sources merged into a recent feed
/// and its archive.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationTarget {
    pub key: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sources: Vec<String>,
    pub output: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_aggregate_max_items")]
    pub max_items: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub source_attribution: SourceAttribution,
}

/// The primary single-source feed scraped from a rendered HTML table.
#[derive(Debug, Clone, Deserialize)]
pub struct TableFeedConfig {
    pub url: String,
    pub table_id: String,
    pub output: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_table_max_items")]
    pub max_items: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    60
}

fn default_aggregate_max_items() -> usize {
    150
}

fn default_table_max_items() -> usize {
    512
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".to_string()
}

/// Parse a configuration document.
pub fn parse_config(yaml: &str) -> Result<Config, Box<dyn Error>> {
    let config: Config = serde_yaml::from_str(yaml)?;
    Ok(config)
}

/// Load and parse the configuration file at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_config(path: &Path) -> Result<Config, Box<dyn Error>> {
    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("reading config {}: {e}", path.display()))?;
    let config = parse_config(&yaml)?;
    info!(
        targets = config.aggregated_feeds.len(),
        table_feed = config.table_feed.is_some(),
        "Loaded configuration"
    );
    Ok(config)
}

/// Whether an environment value switches a toggle on.
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Read the fast-mode toggle from the environment.
pub fn fast_mode_from_env() -> bool {
    is_truthy(std::env::var(FAST_MODE_ENV).ok().as_deref())
}
