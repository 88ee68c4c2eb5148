//! Command-line interface definitions for rolling_rss.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every option can also be supplied through an environment variable.

use clap::Parser;
use clap::builder::FalseyValueParser;
use std::path::PathBuf;

/// Command-line arguments for the rolling_rss binary.
///
/// # Examples
///
/// ```sh
/// # Run everything described in feeds.yml
/// rolling_rss
///
/// # Different config, output into ./_site
/// rolling_rss -c ./config/feeds.yml -o ./_site
///
/// # Local run without politeness delays (never against real sources)
/// ROLLING_RSS_FAST=1 rolling_rss --skip-table
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "ROLLING_RSS_CONFIG", default_value = "feeds.yml")]
    pub config: PathBuf,

    /// Override the configured output directory
    #[arg(short, long, env = "ROLLING_RSS_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Remove all politeness delays (tests and local runs only)
    #[arg(long, env = "ROLLING_RSS_FAST", value_parser = FalseyValueParser::new())]
    pub fast: bool,

    /// Do not scrape or publish the table feed
    #[arg(long)]
    pub skip_table: bool,

    /// Do not run the aggregation targets
    #[arg(long)]
    pub skip_aggregate: bool,
}
