//! # rolling_rss
//!
//! Maintains rolling RSS feeds with time-based retention and an append-only
//! archive, from two kinds of sources:
//!
//! - a primary page whose items are published as an HTML table
//!   ([`scrapers::publish_table_feed`])
//! - sets of external RSS / Atom feeds merged into aggregated feeds
//!   ([`aggregate::run_all`])
//!
//! ## Architecture
//!
//! 1. **Fetching**: external sources are fetched one at a time under a
//!    politeness policy (random delays, per-domain pacing, backoff retries,
//!    conditional requests), see [`fetch`]
//! 2. **Bookkeeping**: every fetch result is recorded in the persisted
//!    [`cache::FetchCache`]; sources failing too often are skipped
//! 3. **Retention**: entries are fingerprinted, deduplicated and split into
//!    a recent window and an archive, see [`retention`]
//! 4. **Output**: feed documents and health reports, see [`outputs`]
//!
//! The library never installs a tracing subscriber; the binary does.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod models;
pub mod outputs;
pub mod retention;
pub mod scrapers;
pub mod snapshot;
pub mod utils;

pub use aggregate::{AggregationReport, TargetRun, aggregate, run_all};
pub use config::{Config, FetchPolicy, load_config};
pub use fetch::{FetchOutcome, HttpTransport, PoliteFetcher};
pub use scrapers::{HttpPageSource, publish_table_feed};
