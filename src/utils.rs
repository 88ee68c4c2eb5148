//! Utility functions for logging, URLs, dates, output paths and the file system.
//!
//! This module provides helper functions used throughout the crate:
//! - String truncation for logging and error excerpts
//! - Hostname extraction for pacing and source attribution
//! - Lenient publication-date parsing shared by feed items and table rows
//! - Derivation of the sibling archive/health paths of a feed
//! - File system validation for output directories

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::error::Error;
use std::fs as stdfs;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes (backing off to the
/// nearest character boundary) with an ellipsis and byte count appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Extract the lowercase hostname from a URL.
///
/// Returns `None` for unparsable URLs and URLs without a host.
pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

const PLAIN_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];
const PLAIN_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse a publication date as found in feeds and scraped tables.
///
/// Tries RFC 2822 (RSS `pubDate`), RFC 3339 (Atom, `dc:date`), then a few
/// plain date and date-time layouts interpreted as UTC. Returns `None` when
/// nothing matches; callers decide the fallback.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in PLAIN_DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    for fmt in PLAIN_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
        }
    }
    None
}

/// The files produced for one feed target.
///
/// Given the recent document `<dir>/<stem>.xml`, the archive lives at
/// `<dir>/<stem>_archive.xml` and the health artifacts at
/// `<dir>/<stem>_health.json` and `<dir>/<stem>_health.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub recent: PathBuf,
    pub archive: PathBuf,
    pub health_json: PathBuf,
    pub health_markdown: PathBuf,
}

impl OutputPaths {
    /// Resolve a configured output under `output_dir`.
    ///
    /// Site-relative outputs such as `/feeds/ai.xml` are accepted; the leading
    /// slash is dropped so the file lands inside `output_dir`.
    pub fn resolve(output_dir: &Path, output: &str) -> Self {
        let recent = output_dir.join(output.trim_start_matches('/'));
        let parent = recent.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = recent
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "feed".to_string());

        Self {
            archive: parent.join(format!("{stem}_archive.xml")),
            health_json: parent.join(format!("{stem}_health.json")),
            health_markdown: parent.join(format!("{stem}_health.md")),
            recent,
        }
    }
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}

/// Create the parent directory of `path` if it has one.
pub async fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "ééééé"; // 2 bytes each
        let result = truncate_for_log(s, 3);
        assert!(result.starts_with('é'));
        assert!(result.contains("(+8 bytes)"));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://Feeds.Example.com/rss.xml?x=1").as_deref(),
            Some("feeds.example.com")
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_parse_pub_date_rfc2822_and_rfc3339() {
        let a = parse_pub_date("Fri, 16 May 2025 14:30:00 +0200").unwrap();
        assert_eq!(a.hour(), 12);
        let b = parse_pub_date("2025-05-16T14:30:00Z").unwrap();
        assert_eq!(b.day(), 16);
    }

    #[test]
    fn test_parse_pub_date_plain_formats() {
        let d = parse_pub_date("2025-05-16").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2025, 5, 16));
        let d = parse_pub_date("05/16/2025").unwrap();
        assert_eq!((d.month(), d.day()), (5, 16));
        let d = parse_pub_date("2025-05-16 08:15:00").unwrap();
        assert_eq!(d.hour(), 8);
        assert!(parse_pub_date("yesterday").is_none());
        assert!(parse_pub_date("  ").is_none());
    }

    #[test]
    fn test_output_paths_resolve() {
        let paths = OutputPaths::resolve(Path::new("/srv/site"), "/feeds/external.xml");
        assert_eq!(paths.recent, PathBuf::from("/srv/site/feeds/external.xml"));
        assert_eq!(paths.archive, PathBuf::from("/srv/site/feeds/external_archive.xml"));
        assert_eq!(paths.health_json, PathBuf::from("/srv/site/feeds/external_health.json"));
        assert_eq!(paths.health_markdown, PathBuf::from("/srv/site/feeds/external_health.md"));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__probe_write__").exists());
    }
}
