//! # rolling_rss
//!
//! Scheduled entry point: publishes the table feed, then every aggregated
//! feed described in the configuration file.
//!
//! ## Usage
//!
//! ```sh
//! rolling_rss -c feeds.yml -o ./_site
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).
//!
//! ## Exit status
//!
//! Non-zero when the configuration cannot be loaded, the output directory is
//! not writable, or the table feed cannot be published (page not rendered,
//! table missing, or recent document not written). The previous table feed is
//! left untouched in the first two cases.
//! Failing sources and failing aggregation targets are logged and reported in
//! the health artifacts but do not fail the run.

use chrono::Utc;
use clap::Parser;
use itertools::Itertools;
use rolling_rss::config::{fast_mode_from_env, load_config};
use rolling_rss::utils::ensure_writable_dir;
use rolling_rss::{HttpPageSource, HttpTransport, publish_table_feed, run_all};
use std::error::Error;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "rolling_rss starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let mut config = match load_config(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Could not load configuration");
            return Err(e);
        }
    };
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if args.fast || fast_mode_from_env() {
        warn!("Fast mode enabled: politeness delays are disabled");
        config.fetch_policy = config.fetch_policy.fast();
    }

    // Early check: the output dir must be writable before anything is fetched
    if let Err(e) = ensure_writable_dir(&config.output_dir).await {
        error!(
            path = %config.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Table feed ----
    let mut table_error: Option<Box<dyn Error>> = None;
    match (&config.table_feed, args.skip_table) {
        (_, true) => info!("Table feed skipped by flag"),
        (None, false) => info!("No table feed configured"),
        (Some(table), false) => {
            let source = HttpPageSource::new(&table.user_agent, config.fetch_policy.timeout())?;
            match publish_table_feed(table, &config.output_dir, &source, Utc::now()).await {
                Ok(report) => info!(
                    rows = report.rows,
                    changed = report.changed,
                    recent = report.publish.recent,
                    archive_added = report.publish.archive_added,
                    "Table feed published"
                ),
                Err(e) => {
                    error!(error = %e, "Table feed could not be published");
                    table_error = Some(e);
                }
            }
        }
    }

    // ---- Aggregated feeds ----
    if args.skip_aggregate {
        info!("Aggregation skipped by flag");
    } else {
        let transport = HttpTransport::new()?;
        let runs = run_all(&config, &transport, Utc::now()).await;
        let failed = runs
            .iter()
            .filter(|run| run.result.is_err())
            .map(|run| run.key.as_str())
            .collect_vec();
        if failed.is_empty() {
            info!(targets = runs.len(), "All aggregation targets published");
        } else {
            warn!(targets = runs.len(), failed = %failed.join(", "), "Some aggregation targets failed");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        elapsed_human = %format!("{:.2}s", elapsed.as_secs_f64()),
        "rolling_rss finished"
    );

    match table_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
