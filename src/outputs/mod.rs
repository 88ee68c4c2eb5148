//! Output artifacts: feed documents, archives and health reports.
//!
//! # Submodules
//!
//! - [`feed`]: Renders and writes RSS 2.0 documents (recent feeds and archives)
//! - [`archive`]: Reads a previously written archive back for merging
//! - [`health`]: Health JSON, Markdown report, prune candidates and the skipped-sources list
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── ai_rss_feed.xml                 # table feed, recent window
//! ├── ai_rss_feed_archive.xml         # table feed, aged-out entries
//! ├── aggregated_external.xml         # aggregation target, recent window
//! ├── aggregated_external_archive.xml
//! ├── aggregated_external_health.json
//! ├── aggregated_external_health.md
//! ├── previous_data.json              # last table snapshot
//! └── skipped_sources.json
//! ```

pub mod archive;
pub mod feed;
pub mod health;
