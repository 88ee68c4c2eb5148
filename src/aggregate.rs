//! Aggregation engine.
//!
//! [`aggregate`] runs one configured target: it fetches every source through
//! the [`PoliteFetcher`], turns the items into fingerprinted entries, and
//! publishes the recent/archive pair via [`publish_split`]. Source order is
//! shuffled on every run so no source is systematically last in line for the
//! pacing budget.
//!
//! [`run_all`] drives every enabled target against a single fetch cache that
//! is loaded once at the start and saved once at the end.
//!
//! Sources are fetched strictly one after another; the per-domain and global
//! politeness delays assume there is no concurrent fan-out.

use crate::cache::{self, FetchCache};
use crate::config::{AggregationTarget, Config};
use crate::fetch::{FeedTransport, FetchOutcome, PoliteFetcher};
use crate::models::AggregatedEntry;
use crate::outputs::health::{HealthReport, write_health, write_skipped_sources};
use crate::retention::{FeedSettings, PublishSummary, publish_split, to_entry};
use crate::utils::OutputPaths;
use chrono::{DateTime, Utc};
use rand::rng;
use rand::seq::SliceRandom;
use std::error::Error;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Result of one aggregation target.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationReport {
    pub key: String,
    pub health: HealthReport,
    pub publish: PublishSummary,
}

/// Aggregate one target.
///
/// # Arguments
///
/// * `target` - Sources, output and window of this target
/// * `config` - Output directory, fetch policy and prune threshold
/// * `cache` - Fetch cache, updated in place for every source
/// * `transport` - Network seam used by the fetcher
/// * `now` - Reference time for retention and report timestamps
///
/// # Returns
///
/// The health report and publish summary. An error means the recent document
/// could not be written; health artifact failures are only logged.
#[instrument(level = "info", skip_all, fields(key = %target.key, sources = target.sources.len()))]
pub async fn aggregate<T: FeedTransport>(
    target: &AggregationTarget,
    config: &Config,
    cache: &mut FetchCache,
    transport: &T,
    now: DateTime<Utc>,
) -> Result<AggregationReport, Box<dyn Error>> {
    let t0 = Instant::now();
    let fetcher = PoliteFetcher::new(transport, &config.fetch_policy);
    let paths = OutputPaths::resolve(&config.output_dir, &target.output);

    let mut sources = target.sources.clone();
    sources.shuffle(&mut rng());

    let mut health = HealthReport::new(&target.key, now);
    let mut entries: Vec<AggregatedEntry> = Vec::new();

    for url in &sources {
        let failures_before = cache.failures(url);
        let was_eligible = cache.record(url).is_none_or(|r| r.is_eligible());
        let outcome = fetcher.fetch(url, cache).await;
        if !was_eligible && outcome != FetchOutcome::Skipped {
            info!(%url, "Previously skipped source is below the threshold again");
        }
        health.record(url, &outcome, cache.record(url), failures_before);

        if failures_before > 0 && cache.failures(url) == 0 {
            info!(%url, failures_before, "Source recovered");
        }

        entries.extend(
            outcome
                .into_items()
                .iter()
                .map(|item| to_entry(item, target.source_attribution)),
        );
    }
    health.finish(config.prune_threshold);

    info!(
        attempted = health.attempted,
        skipped = health.skipped,
        with_items = health.with_items,
        failures = health.failures,
        recovered = health.recovered,
        entries = entries.len(),
        "Fetched all sources"
    );

    let publish = publish_split(&paths, &FeedSettings::from(target), entries, now).await?;

    if let Err(e) = write_health(&paths, &health).await {
        error!(error = %e, "Failed to write health report");
    }
    for candidate in &health.prune_candidates {
        warn!(url = %candidate.url, reason = %candidate.reason, "Prune candidate");
    }

    info!(
        elapsed_ms = t0.elapsed().as_millis() as u64,
        recent = publish.recent,
        archive_added = publish.archive_added,
        "Aggregation finished"
    );
    Ok(AggregationReport {
        key: target.key.clone(),
        health,
        publish,
    })
}

/// Outcome of one target within [`run_all`].
#[derive(Debug)]
pub struct TargetRun {
    pub key: String,
    pub result: Result<AggregationReport, Box<dyn Error>>,
}

/// Run every enabled aggregation target in configuration order.
///
/// A failing target is logged and does not stop the others. The cache is
/// saved and the skipped-sources list written after the last target, even
/// when targets failed.
#[instrument(level = "info", skip_all, fields(targets = config.aggregated_feeds.len()))]
pub async fn run_all<T: FeedTransport>(
    config: &Config,
    transport: &T,
    now: DateTime<Utc>,
) -> Vec<TargetRun> {
    let mut cache = cache::load(&config.cache_path).await;
    let mut runs = Vec::new();

    for target in &config.aggregated_feeds {
        if !target.enabled {
            info!(key = %target.key, "Target disabled; skipping");
            continue;
        }
        let result = aggregate(target, config, &mut cache, transport, now).await;
        if let Err(e) = &result {
            error!(key = %target.key, error = %e, "Aggregation target failed");
        }
        runs.push(TargetRun {
            key: target.key.clone(),
            result,
        });
    }

    if let Err(e) = cache::save(&config.cache_path, &cache).await {
        error!(error = %e, "Failed to save fetch cache");
    }
    let skipped_path = config.output_dir.join(&config.skipped_sources_path);
    if let Err(e) = write_skipped_sources(&skipped_path, &cache, now).await {
        error!(error = %e, "Failed to write skipped sources list");
    }

    runs
}
