//! Data models shared by the fetcher, the aggregation engine and the feed outputs.
//!
//! This module defines the core data structures used throughout the crate:
//! - [`SourceRecord`]: Persisted per-source fetch state (validators, failures, skip status)
//! - [`Classification`] and [`LastStatus`]: How the last fetch of a source ended
//! - [`FeedItem`]: A raw item parsed out of an external feed
//! - [`AggregatedEntry`]: The canonical, fingerprinted unit after dedup
//! - [`FeedEntry`] and [`FeedMetadata`]: What the feed writer serializes
//! - [`SourceAttribution`]: How an entry is tagged with the host it came from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome category of the most recent fetch of a source.
///
/// Failure classes drive the skip and prune policies: DNS and TLS failures are
/// considered permanent, HTTP and parse failures transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "not_modified")]
    NotModified,
    #[serde(rename = "skipped")]
    Skipped,
    #[serde(rename = "dns_error")]
    DnsError,
    #[serde(rename = "ssl_error")]
    SslError,
    #[serde(rename = "http_4xx")]
    Http4xx,
    #[serde(rename = "http_5xx")]
    Http5xx,
    #[serde(rename = "xml_error")]
    XmlError,
    #[serde(rename = "other_failure")]
    OtherFailure,
}

impl Classification {
    /// Wire name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::NotModified => "not_modified",
            Classification::Skipped => "skipped",
            Classification::DnsError => "dns_error",
            Classification::SslError => "ssl_error",
            Classification::Http4xx => "http_4xx",
            Classification::Http5xx => "http_5xx",
            Classification::XmlError => "xml_error",
            Classification::OtherFailure => "other_failure",
        }
    }

    /// DNS and TLS failures rarely resolve by retrying; they make a source a
    /// prune candidate after a single failure.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Classification::DnsError | Classification::SslError)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last status observed for a source: an HTTP code, or a label such as
/// `"exception"` when the request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LastStatus {
    Http(u16),
    Label(String),
}

impl LastStatus {
    pub fn exception() -> Self {
        LastStatus::Label("exception".to_string())
    }

    /// The HTTP code, if the last attempt got that far.
    pub fn http_code(&self) -> Option<u16> {
        match self {
            LastStatus::Http(code) => Some(*code),
            LastStatus::Label(_) => None,
        }
    }
}

impl fmt::Display for LastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastStatus::Http(code) => write!(f, "{code}"),
            LastStatus::Label(label) => f.write_str(label),
        }
    }
}

/// Persisted fetch state of one configured source URL.
///
/// Records are created lazily on the first fetch attempt and kept across runs
/// in the fetch cache. The URL is the key of the record in the cache map.
///
/// Every field defaults, so cache files written by older versions (or edited
/// by hand) still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRecord {
    /// Failed fetch runs in a row. Reset only by a successful, non-304 fetch.
    pub consecutive_failures: u32,
    pub last_status: Option<LastStatus>,
    pub last_error: Option<String>,
    pub last_classification: Option<Classification>,
    pub last_success: Option<DateTime<Utc>>,
    /// One-run immunity from the skip threshold, set by a successful fetch.
    pub recent_success_grace: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub skipped: bool,
}

impl SourceRecord {
    /// A source may be fetched unless it is skipped and has no grace left.
    pub fn is_eligible(&self) -> bool {
        !(self.skipped && !self.recent_success_grace)
    }
}

/// A raw item as parsed from an external feed, before fingerprinting.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Parsed publication time; the fetch time when the feed's date was missing or unparsable.
    pub published: DateTime<Utc>,
    /// Hostname of the source URL the item was fetched from.
    pub source_host: String,
}

/// The canonical post-dedup unit written to feeds.
///
/// `guid` is a deterministic fingerprint of the untagged title, the link and
/// the normalized publication time, so the same logical item maps to the same
/// guid on every run.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedEntry {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: DateTime<Utc>,
}

impl AggregatedEntry {
    /// Convert to the serialized form, rendering the publication time as RFC 2822.
    pub fn to_feed_entry(&self) -> FeedEntry {
        FeedEntry {
            guid: self.guid.clone(),
            title: self.title.clone(),
            link: self.link.clone(),
            description: self.description.clone(),
            pub_date: self.published.to_rfc2822(),
        }
    }
}

/// One `<item>` as written to, or read back from, a feed document.
///
/// `pub_date` is kept as text so entries read from an existing archive can be
/// written back without reformatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

/// Channel-level metadata of a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMetadata {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
    pub generator: String,
}

/// Where the originating hostname is shown on aggregated entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceAttribution {
    /// Append ` (Source: <host>)` to the title.
    #[default]
    Title,
    /// Prefix `[Source: <host>] ` to the description.
    Description,
    None,
}

impl SourceAttribution {
    /// Apply the attribution to an item's title and description.
    pub fn apply(&self, title: &str, description: &str, host: &str) -> (String, String) {
        match self {
            SourceAttribution::Title => {
                (format!("{title} (Source: {host})"), description.to_string())
            }
            SourceAttribution::Description => {
                (title.to_string(), format!("[Source: {host}] {description}"))
            }
            SourceAttribution::None => (title.to_string(), description.to_string()),
        }
    }
}
