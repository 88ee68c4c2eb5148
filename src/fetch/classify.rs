//! Source health classification.
//!
//! Maps the last error text and HTTP status of a failed fetch to a
//! [`Classification`]. The order of the checks matters:
//!
//! 1. `xml` / `parse` in the error text → [`Classification::XmlError`]
//! 2. name-resolution indicators → [`Classification::DnsError`]
//! 3. TLS indicators → [`Classification::SslError`]
//! 4. HTTP 4xx / 5xx status → [`Classification::Http4xx`] / [`Classification::Http5xx`]
//! 5. anything else → [`Classification::OtherFailure`]

use crate::models::Classification;
use once_cell::sync::Lazy;
use regex::Regex;

static DNS_INDICATORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)name or service not known|nodename nor servname|nxdomain|temporary failure in name resolution|failed to lookup address|dns error|no such host",
    )
    .expect("valid DNS indicator regex")
});

static TLS_INDICATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ssl|tls|certificate").expect("valid TLS indicator regex"));

/// Classify a failed fetch from its error text and last HTTP status.
pub fn classify_failure(error_text: &str, http_status: Option<u16>) -> Classification {
    let lower = error_text.to_ascii_lowercase();
    if lower.contains("xml") || lower.contains("parse") {
        return Classification::XmlError;
    }
    if DNS_INDICATORS.is_match(error_text) {
        return Classification::DnsError;
    }
    if TLS_INDICATORS.is_match(error_text) {
        return Classification::SslError;
    }
    match http_status {
        Some(400..=499) => Classification::Http4xx,
        Some(500..=599) => Classification::Http5xx,
        _ => Classification::OtherFailure,
    }
}
