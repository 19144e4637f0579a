//! Page acquisition boundary.
//!
//! The pipeline only needs two operations from the transport: fetch a
//! product page as HTML, and probe a URL for its status and final location.
//! Both live behind a trait so the collector and the URL monitor can be
//! exercised against stubs.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::infrastructure::config::CrawlingConfig;

/// Responses shorter than this are treated as error pages, not content.
const MIN_HTML_LEN: usize = 100;

/// Outcome of a health-check probe. Redirects are visible as a differing
/// `final_url`; 404s and other statuses come back as data, not errors.
#[derive(Debug, Clone)]
pub struct UrlStatus {
    pub original_url: String,
    pub final_url: String,
    pub status_code: u16,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch rendered page HTML, retrying transport failures up to the
    /// configured budget. A `wait_selector` that is missing from the
    /// fetched document is logged and ignored; the document is returned
    /// as-is.
    async fn fetch_page(&self, url: &str, wait_selector: Option<&str>) -> Result<String>;

    /// Probe a URL with a short timeout, following redirects.
    async fn check_url(&self, url: &str) -> Result<UrlStatus>;
}

/// reqwest-backed fetcher.
pub struct HttpPageFetcher {
    client: Client,
    probe_client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpPageFetcher {
    pub fn new(config: &CrawlingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(&config.user_agent)
            .gzip(true)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        let probe_client = Client::builder()
            .timeout(Duration::from_secs(config.health_check_timeout_secs))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create probe client")?;

        Ok(Self {
            client,
            probe_client,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        debug!("Fetching HTML from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "HTTP error: {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ));
        }

        let html = response
            .text()
            .await
            .context("Failed to read response body")?;

        if html.len() < MIN_HTML_LEN {
            return Err(anyhow!(
                "Response body too short ({} bytes), likely an error page",
                html.len()
            ));
        }

        debug!("Fetched {} bytes of HTML", html.len());
        Ok(html)
    }

    fn check_wait_selector(html: &str, wait_selector: &str, url: &str) {
        let Ok(selector) = Selector::parse(wait_selector) else {
            warn!("Invalid wait selector '{}', skipping check", wait_selector);
            return;
        };
        let document = Html::parse_document(html);
        if document.select(&selector).next().is_none() {
            warn!(
                "Marker element '{}' not present in {}, proceeding with what loaded",
                wait_selector, url
            );
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str, wait_selector: Option<&str>) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.fetch_once(url).await {
                Ok(html) => {
                    debug!("Fetched {} on attempt {}", url, attempt);
                    if let Some(marker) = wait_selector {
                        Self::check_wait_selector(&html, marker, url);
                    }
                    return Ok(html);
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} failed for {}: {}",
                        attempt, self.max_retries, url, e
                    );
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }

        error!("All {} fetch attempts failed for {}", self.max_retries, url);
        Err(last_error.unwrap_or_else(|| anyhow!("All fetch attempts failed for {}", url)))
    }

    async fn check_url(&self, url: &str) -> Result<UrlStatus> {
        let response = self
            .probe_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        Ok(UrlStatus {
            original_url: url.to_string(),
            final_url: response.url().to_string(),
            status_code: response.status().as_u16(),
        })
    }
}
