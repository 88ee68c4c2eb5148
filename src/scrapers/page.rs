//! Page rendering seam for the table source.
//!
//! A headless-browser session would implement [`PageSource`] and tear itself
//! down when dropped. The crate ships [`HttpPageSource`], a plain GET for
//! pages whose table is already present in the served HTML.

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::error::Error;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

/// Trait for obtaining the rendered HTML of a page.
pub trait PageSource {
    async fn render(&self, url: &str) -> Result<String, Box<dyn Error>>;
}

/// `reqwest`-backed page source sending a fixed browser user agent.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpPageSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

impl PageSource for HttpPageSource {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn render(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let t0 = Instant::now();
        let html = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        info!(
            bytes = html.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched page"
        );
        Ok(html)
    }
}
