//! Polite fetching of external feeds.
//!
//! [`PoliteFetcher::fetch`] performs one source fetch under the politeness
//! rules of a [`FetchPolicy`]:
//!
//! 1. Sources over the failure threshold without a grace flag are skipped
//!    without any network call.
//! 2. Requests to the same host are spaced by `per_domain_min_interval`, and
//!    every fetch additionally waits a random `[min_delay, max_delay]`.
//! 3. Each request carries a randomly chosen browser user agent, feed accept
//!    headers, and the stored `ETag` / `Last-Modified` validators.
//! 4. Failed attempts are retried with exponential backoff plus jitter.
//!
//! The outcome is returned as a [`FetchOutcome`] value and every result is
//! recorded in the source's [`SourceRecord`](crate::models::SourceRecord).
//! Nothing in here returns an error: a failing source degrades to zero items.
//!
//! # Submodules
//!
//! - [`transport`]: the HTTP seam ([`FeedTransport`]) and its `reqwest` implementation
//! - [`classify`]: failure classification
//! - [`parse`]: RSS / RDF / Atom body parsing

pub mod classify;
pub mod parse;
pub mod transport;

use crate::cache::FetchCache;
use crate::config::{FetchPolicy, secs};
use crate::models::{Classification, FeedItem, LastStatus};
use crate::utils::{host_of, truncate_for_log};
use chrono::Utc;
use classify::classify_failure;
use parse::parse_feed;
use rand::{Rng, rng};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
pub use transport::{FeedRequest, FeedResponse, FeedTransport, HttpTransport, TransportError};

const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const ACCEPT_FEEDS: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";

/// Stored `last_error` texts are cut to this many bytes.
const MAX_STORED_ERROR: usize = 500;

/// How one source fetch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The feed was fetched and parsed; it may legitimately hold zero items.
    Items(Vec<FeedItem>),
    /// The server answered 304 to the conditional request.
    NotModified,
    /// The source is over the failure threshold; no request was made.
    Skipped,
    /// Every attempt failed, or the body could not be parsed.
    Failed {
        classification: Classification,
        detail: String,
    },
}

impl FetchOutcome {
    pub fn item_count(&self) -> usize {
        match self {
            FetchOutcome::Items(items) => items.len(),
            _ => 0,
        }
    }

    pub fn into_items(self) -> Vec<FeedItem> {
        match self {
            FetchOutcome::Items(items) => items,
            _ => Vec::new(),
        }
    }
}

/// Largest delay drawn at random, in seconds.
const MAX_RANDOM_SECS: f64 = u32::MAX as f64;

fn clamp_secs(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_RANDOM_SECS)
    }
}

/// Draw uniformly from `[lo, hi]` seconds; a degenerate range yields `lo`.
/// Both bounds are clamped to `[0, MAX_RANDOM_SECS]`.
fn uniform_secs(lo: f64, hi: f64) -> Duration {
    let (lo, hi) = (clamp_secs(lo), clamp_secs(hi));
    if hi <= lo {
        return secs(lo);
    }
    secs(rng().random_range(lo..=hi))
}

/// Delay before the attempt following attempt number `attempt` (1-based):
/// `base^(attempt - 1) + uniform(0, jitter)` seconds.
pub fn backoff_delay(policy: &FetchPolicy, attempt: u32) -> Duration {
    if policy.retry_backoff_base <= 0.0 {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(1).min(30) as i32;
    secs(policy.retry_backoff_base.powi(exp))
        .saturating_add(uniform_secs(0.0, policy.retry_jitter))
}

fn random_user_agent() -> &'static str {
    USER_AGENTS[rng().random_range(0..USER_AGENTS.len())]
}

/// Fetches single sources politely, recording results in a [`FetchCache`].
#[derive(Debug)]
pub struct PoliteFetcher<'a, T> {
    transport: &'a T,
    policy: &'a FetchPolicy,
}

impl<'a, T> PoliteFetcher<'a, T>
where
    T: FeedTransport,
{
    pub fn new(transport: &'a T, policy: &'a FetchPolicy) -> Self {
        Self { transport, policy }
    }

    /// Fetch `url` and return its items.
    ///
    /// Mutates `cache` in place: the source's record always reflects this
    /// call, and the host's pacing timestamp is updated before every request.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str, cache: &mut FetchCache) -> FetchOutcome {
        if self.should_skip(url, cache) {
            let record = cache.record_mut(url);
            record.skipped = true;
            record.last_classification = Some(Classification::Skipped);
            info!(
                consecutive_failures = record.consecutive_failures,
                threshold = self.policy.skip_after_failures,
                "Skipping source over failure threshold"
            );
            return FetchOutcome::Skipped;
        }
        cache.record_mut(url).skipped = false;

        let host = host_of(url).unwrap_or_default();
        self.pace(&host, cache).await;

        let attempts = self.policy.attempts();
        let total_t0 = Instant::now();
        let mut last_status = LastStatus::exception();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if !host.is_empty() {
                cache.mark_request(&host, Utc::now());
            }
            let request = self.build_request(url, cache);

            match self.transport.get(&request).await {
                Ok(resp) if resp.status == 304 => {
                    let record = cache.record_mut(url);
                    record.last_status = Some(LastStatus::Http(304));
                    record.last_error = None;
                    record.last_classification = Some(Classification::NotModified);
                    info!(attempt, "Source not modified");
                    return FetchOutcome::NotModified;
                }
                Ok(resp) if resp.status >= 400 => {
                    last_status = LastStatus::Http(resp.status);
                    last_error = format!("HTTP {}", resp.status);
                }
                Ok(resp) => match parse_feed(&resp.body, &host, Utc::now()) {
                    Ok(items) => {
                        let record = cache.record_mut(url);
                        record.last_status = Some(LastStatus::Http(resp.status));
                        record.last_error = None;
                        record.last_classification = Some(Classification::Success);
                        record.etag = resp.etag;
                        record.last_modified = resp.last_modified;
                        record.consecutive_failures = 0;
                        record.last_success = Some(Utc::now());
                        record.recent_success_grace = true;
                        info!(
                            attempt,
                            items = items.len(),
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            "Fetched source"
                        );
                        return FetchOutcome::Items(items);
                    }
                    Err(e) => {
                        // a malformed body will not improve on retry
                        last_status = LastStatus::Http(resp.status);
                        last_error = e.to_string();
                        warn!(attempt, error = %e, "Source returned an unreadable feed");
                        break;
                    }
                },
                Err(e) => {
                    last_status = LastStatus::exception();
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                let delay = backoff_delay(self.policy, attempt);
                warn!(
                    attempt,
                    max = attempts,
                    ?delay,
                    error = %truncate_for_log(&last_error, 200),
                    "Fetch attempt failed; backing off"
                );
                sleep(delay).await;
            }
        }

        let classification = classify_failure(&last_error, last_status.http_code());
        let record = cache.record_mut(url);
        record.consecutive_failures += 1;
        record.recent_success_grace = false;
        record.last_status = Some(last_status);
        record.last_error = Some(truncate_for_log(&last_error, MAX_STORED_ERROR));
        record.last_classification = Some(classification);
        warn!(
            %classification,
            consecutive_failures = record.consecutive_failures,
            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
            error = %truncate_for_log(&last_error, 200),
            "Source fetch failed"
        );
        FetchOutcome::Failed {
            classification,
            detail: last_error,
        }
    }

    fn should_skip(&self, url: &str, cache: &FetchCache) -> bool {
        let threshold = self.policy.skip_after_failures;
        cache.record(url).is_some_and(|r| {
            threshold > 0 && r.consecutive_failures >= threshold && !r.recent_success_grace
        })
    }

    /// Wait out the per-domain interval, then the unconditional random delay.
    async fn pace(&self, host: &str, cache: &FetchCache) {
        let interval = self.policy.per_domain_interval();
        if let Some(last) = cache.last_request(host) {
            let elapsed = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < interval {
                let wait = (interval - elapsed).min(interval);
                debug!(%host, ?wait, "Per-domain throttle");
                sleep(wait).await;
            }
        }

        let delay = uniform_secs(self.policy.min_delay, self.policy.max_delay);
        if !delay.is_zero() {
            debug!(?delay, "Politeness delay");
            sleep(delay).await;
        }
    }

    fn build_request(&self, url: &str, cache: &FetchCache) -> FeedRequest {
        let mut headers = vec![
            ("User-Agent".to_string(), random_user_agent().to_string()),
            ("Accept".to_string(), ACCEPT_FEEDS.to_string()),
            ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
        ];
        if let Some(record) = cache.record(url) {
            if let Some(etag) = &record.etag {
                headers.push(("If-None-Match".to_string(), etag.clone()));
            }
            if let Some(last_modified) = &record.last_modified {
                headers.push(("If-Modified-Since".to_string(), last_modified.clone()));
            }
        }
        FeedRequest {
            url: url.to_string(),
            headers,
            timeout: self.policy.timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::ScriptedTransport;

    const URL: &str = "https://feeds.example.com/rss.xml";

    const BODY: &str = r#"<rss version="2.0"><channel><title>x</title>
<item><title>One</title><link>https://feeds.example.com/1</link><pubDate>Fri, 16 May 2025 14:30:00 +0000</pubDate></item>
<item><title>Two</title><link>https://feeds.example.com/2</link></item>
</channel></rss>"#;

    fn policy() -> FetchPolicy {
        FetchPolicy::default().fast()
    }

    fn ok_with_validators() -> FeedResponse {
        FeedResponse {
            status: 200,
            etag: Some("\"v2\"".into()),
            last_modified: Some("Fri, 16 May 2025 14:30:00 GMT".into()),
            body: BODY.into(),
        }
    }

    #[tokio::test]
    async fn test_success_resets_failures_and_sets_grace() {
        let transport = ScriptedTransport::new();
        transport.respond(URL, ok_with_validators());
        let policy = policy();
        let mut cache = FetchCache::default();
        cache.record_mut(URL).consecutive_failures = 3;

        let outcome = PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;

        assert_eq!(outcome.item_count(), 2);
        let record = cache.record(URL).unwrap();
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.recent_success_grace);
        assert_eq!(record.last_classification, Some(Classification::Success));
        assert_eq!(record.etag.as_deref(), Some("\"v2\""));
        assert!(record.last_success.is_some());
        assert!(record.last_error.is_none());
        assert!(cache.last_request("feeds.example.com").is_some());
    }

    #[tokio::test]
    async fn test_request_carries_identity_and_validators() {
        let transport = ScriptedTransport::new();
        transport.respond(URL, FeedResponse::status(304));
        let policy = policy();
        let mut cache = FetchCache::default();
        {
            let record = cache.record_mut(URL);
            record.etag = Some("\"v1\"".into());
            record.last_modified = Some("Thu, 15 May 2025 00:00:00 GMT".into());
        }

        PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;

        let requests = transport.requests();
        let request = &requests[0];
        assert!(USER_AGENTS.contains(&request.header("user-agent").unwrap()));
        assert!(request.header("accept").unwrap().contains("application/rss+xml"));
        assert_eq!(request.header("If-None-Match"), Some("\"v1\""));
        assert_eq!(
            request.header("If-Modified-Since"),
            Some("Thu, 15 May 2025 00:00:00 GMT")
        );
        assert_eq!(request.timeout, policy.timeout());
    }

    #[tokio::test]
    async fn test_not_modified_is_not_a_failure() {
        let transport = ScriptedTransport::new();
        transport.respond(URL, FeedResponse::status(304));
        let policy = policy();
        let mut cache = FetchCache::default();
        {
            let record = cache.record_mut(URL);
            record.consecutive_failures = 1;
            record.last_error = Some("HTTP 500".into());
            record.etag = Some("\"v1\"".into());
        }

        let outcome = PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;

        assert_eq!(outcome, FetchOutcome::NotModified);
        assert_eq!(outcome.item_count(), 0);
        let record = cache.record(URL).unwrap();
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(record.last_classification, Some(Classification::NotModified));
        assert_eq!(record.last_status, Some(LastStatus::Http(304)));
        assert!(record.last_error.is_none());
        assert_eq!(record.etag.as_deref(), Some("\"v1\""));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_skip_threshold_makes_no_request() {
        let transport = ScriptedTransport::new();
        let policy = policy();
        let mut cache = FetchCache::default();
        cache.record_mut(URL).consecutive_failures = policy.skip_after_failures;

        let outcome = PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;

        assert_eq!(outcome, FetchOutcome::Skipped);
        assert_eq!(transport.calls(), 0);
        let record = cache.record(URL).unwrap();
        assert!(record.skipped);
        assert_eq!(record.last_classification, Some(Classification::Skipped));
        assert_eq!(record.consecutive_failures, policy.skip_after_failures);
    }

    #[tokio::test]
    async fn test_grace_is_honored_exactly_once() {
        let transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport.respond(URL, FeedResponse::status(503));
        }
        let policy = policy();
        let mut cache = FetchCache::default();
        {
            let record = cache.record_mut(URL);
            record.consecutive_failures = policy.skip_after_failures;
            record.recent_success_grace = true;
        }
        let fetcher = PoliteFetcher::new(&transport, &policy);

        let first = fetcher.fetch(URL, &mut cache).await;
        assert!(matches!(first, FetchOutcome::Failed { .. }));
        assert_eq!(transport.calls(), 3);
        assert!(!cache.record(URL).unwrap().recent_success_grace);

        let second = fetcher.fetch(URL, &mut cache).await;
        assert_eq!(second, FetchOutcome::Skipped);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_recovery_then_single_failure_does_not_skip() {
        let transport = ScriptedTransport::new();
        transport.respond(URL, FeedResponse::ok(BODY));
        for _ in 0..3 {
            transport.respond(URL, FeedResponse::status(500));
        }
        transport.respond(URL, FeedResponse::ok(BODY));
        let policy = policy();
        let mut cache = FetchCache::default();
        cache.record_mut(URL).consecutive_failures = policy.skip_after_failures - 1;
        let fetcher = PoliteFetcher::new(&transport, &policy);

        assert_eq!(fetcher.fetch(URL, &mut cache).await.item_count(), 2);
        assert_eq!(cache.failures(URL), 0);

        assert!(matches!(
            fetcher.fetch(URL, &mut cache).await,
            FetchOutcome::Failed { .. }
        ));
        assert_eq!(cache.failures(URL), 1);

        assert_eq!(fetcher.fetch(URL, &mut cache).await.item_count(), 2);
        assert_eq!(transport.calls(), 5);
    }

    #[tokio::test]
    async fn test_http_errors_are_retried_then_recorded() {
        let transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport.respond(URL, FeedResponse::status(500));
        }
        let policy = policy();
        let mut cache = FetchCache::default();

        let outcome = PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;

        assert_eq!(
            outcome,
            FetchOutcome::Failed {
                classification: Classification::Http5xx,
                detail: "HTTP 500".into()
            }
        );
        assert_eq!(transport.calls(), 3);
        let record = cache.record(URL).unwrap();
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(record.last_status, Some(LastStatus::Http(500)));
        assert_eq!(record.last_error.as_deref(), Some("HTTP 500"));
        assert!(!record.recent_success_grace);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_attempts() {
        let transport = ScriptedTransport::new();
        transport.fail(URL, "connection reset by peer");
        transport.respond(URL, FeedResponse::ok(BODY));
        let policy = policy();
        let mut cache = FetchCache::default();

        let outcome = PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;

        assert_eq!(outcome.item_count(), 2);
        assert_eq!(transport.calls(), 2);
        assert_eq!(cache.failures(URL), 0);
    }

    #[tokio::test]
    async fn test_unreadable_body_is_not_retried() {
        let transport = ScriptedTransport::new();
        transport.respond(URL, FeedResponse::ok("<html><body>maintenance</body></html>"));
        let policy = policy();
        let mut cache = FetchCache::default();

        let outcome = PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;

        assert!(matches!(
            outcome,
            FetchOutcome::Failed {
                classification: Classification::XmlError,
                ..
            }
        ));
        assert_eq!(transport.calls(), 1);
        assert_eq!(cache.failures(URL), 1);
    }

    #[tokio::test]
    async fn test_dns_failure_is_classified() {
        let transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport.fail(
                URL,
                "error sending request: dns error: failed to lookup address information",
            );
        }
        let policy = policy();
        let mut cache = FetchCache::default();

        PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;

        let record = cache.record(URL).unwrap();
        assert_eq!(record.last_classification, Some(Classification::DnsError));
        assert_eq!(record.last_status, Some(LastStatus::exception()));
    }

    fn paced_policy() -> FetchPolicy {
        FetchPolicy {
            min_delay: 1.0,
            max_delay: 2.0,
            per_domain_min_interval: 5.0,
            ..FetchPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_waits_out_domain_interval_then_random_delay() {
        let transport = ScriptedTransport::new();
        transport.respond(URL, FeedResponse::ok(BODY));
        let policy = paced_policy();
        let mut cache = FetchCache::default();
        cache.mark_request("feeds.example.com", Utc::now() - chrono::Duration::seconds(2));

        let t0 = tokio::time::Instant::now();
        let outcome = PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;
        let waited = t0.elapsed();

        assert_eq!(outcome.item_count(), 2);
        // 3s left of the 5s interval, then 1..=2s; wall-clock drift shaves a little off
        assert!(waited >= Duration::from_millis(3900), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(5), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_caps_wait_for_future_timestamps() {
        let transport = ScriptedTransport::new();
        transport.respond(URL, FeedResponse::ok(BODY));
        let policy = paced_policy();
        let mut cache = FetchCache::default();
        cache.mark_request("feeds.example.com", Utc::now() + chrono::Duration::hours(1));

        let t0 = tokio::time::Instant::now();
        PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;
        let waited = t0.elapsed();

        assert!(waited >= Duration::from_secs(6), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(7), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_host_only_waits_random_delay() {
        let transport = ScriptedTransport::new();
        transport.respond(URL, FeedResponse::ok(BODY));
        let policy = paced_policy();
        let mut cache = FetchCache::default();

        let t0 = tokio::time::Instant::now();
        PoliteFetcher::new(&transport, &policy).fetch(URL, &mut cache).await;
        let waited = t0.elapsed();

        assert!(waited >= Duration::from_secs(1) && waited <= Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_delay_grows_exponentially() {
        let policy = FetchPolicy {
            retry_backoff_base: 2.0,
            retry_jitter: 0.0,
            ..FetchPolicy::default()
        };
        assert_eq!(backoff_delay(&policy, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_secs(4));

        let jittered = FetchPolicy {
            retry_jitter: 0.5,
            ..policy.clone()
        };
        let d = backoff_delay(&jittered, 1);
        assert!(d >= Duration::from_secs(1) && d <= Duration::from_millis(1500));

        assert_eq!(backoff_delay(&policy.fast(), 3), Duration::ZERO);
    }

    #[test]
    fn test_uniform_secs_bounds() {
        for _ in 0..50 {
            let d = uniform_secs(0.1, 0.3);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
        assert_eq!(uniform_secs(0.0, 0.0), Duration::ZERO);
        assert_eq!(uniform_secs(2.0, 1.0), Duration::from_secs(2));
        assert_eq!(uniform_secs(f64::NAN, -1.0), Duration::ZERO);

        let d = uniform_secs(1.0, f64::INFINITY);
        assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_backoff_delay_saturates_on_huge_values() {
        let policy = FetchPolicy {
            retry_backoff_base: 1000.0,
            retry_jitter: f64::INFINITY,
            ..FetchPolicy::default()
        };
        assert_eq!(backoff_delay(&policy, 30), Duration::MAX);
        assert!(backoff_delay(&policy, 1) >= Duration::from_secs(1));
    }
}
