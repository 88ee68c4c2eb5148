//! The network seam of the fetcher.
//!
//! [`FeedTransport`] performs exactly one HTTP GET and reports what came back.
//! It never interprets status codes; retries, conditional-request bookkeeping
//! and classification all live in the fetcher. [`HttpTransport`] is the
//! `reqwest` implementation used in production.

use reqwest::header::{ETAG, HeaderMap, HeaderName, LAST_MODIFIED};
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// A single GET request as built by the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl FeedRequest {
    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the server answered.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Empty for 304 and error responses.
    pub body: String,
}

impl FeedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            etag: None,
            last_modified: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            etag: None,
            last_modified: None,
            body: String::new(),
        }
    }
}

/// A request that produced no HTTP response (DNS, TLS, connect, timeout, body read).
///
/// The request URL is stripped from the text: feed URLs routinely contain
/// words like `xml` or `ssl` that would mislead the classifier.
///
/// The message carries the whole source chain, since the interesting detail
/// ("failed to lookup address", "invalid peer certificate") is usually buried
/// a few levels down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Flatten `err` and all of its sources into one message.
    pub fn from_chain(err: &(dyn Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            let text = inner.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = inner.source();
        }
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for TransportError {}

/// Trait for performing one feed request.
///
/// Implementors send the request as given and return the raw outcome. This
/// abstraction keeps the politeness and retry logic independent of the HTTP
/// client.
pub trait FeedTransport {
    async fn get(&self, request: &FeedRequest) -> Result<FeedResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl FeedTransport for HttpTransport {
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    async fn get(&self, request: &FeedRequest) -> Result<FeedResponse, TransportError> {
        let t0 = Instant::now();
        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| TransportError::from_chain(&e.without_url()))?;

        let status = resp.status().as_u16();
        let etag = header_string(resp.headers(), ETAG);
        let last_modified = header_string(resp.headers(), LAST_MODIFIED);
        let body = if status == 304 || status >= 400 {
            String::new()
        } else {
            resp.text()
                .await
                .map_err(|e| TransportError::from_chain(&e.without_url()))?
        };

        debug!(
            status,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Feed request finished"
        );
        Ok(FeedResponse {
            status,
            etag,
            last_modified,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) use scripted::ScriptedTransport;

#[cfg(test)]
mod scripted {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};

    /// Transport that replays queued responses per URL and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        scripts: RefCell<HashMap<String, VecDeque<Result<FeedResponse, TransportError>>>>,
        requests: RefCell<Vec<FeedRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn push(&self, url: &str, outcome: Result<FeedResponse, TransportError>) {
            self.scripts
                .borrow_mut()
                .entry(url.to_string())
                .or_default()
                .push_back(outcome);
        }

        pub(crate) fn respond(&self, url: &str, response: FeedResponse) {
            self.push(url, Ok(response));
        }

        pub(crate) fn fail(&self, url: &str, message: &str) {
            self.push(url, Err(TransportError::new(message)));
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.borrow().len()
        }

        pub(crate) fn calls_to(&self, url: &str) -> usize {
            self.requests.borrow().iter().filter(|r| r.url == url).count()
        }

        pub(crate) fn requests(&self) -> Vec<FeedRequest> {
            self.requests.borrow().clone()
        }
    }

    impl FeedTransport for ScriptedTransport {
        async fn get(&self, request: &FeedRequest) -> Result<FeedResponse, TransportError> {
            self.requests.borrow_mut().push(request.clone());
            self.scripts
                .borrow_mut()
                .get_mut(&request.url)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| {
                    Err(TransportError::new(format!(
                        "no scripted response for {}",
                        request.url
                    )))
                })
        }
    }
}
