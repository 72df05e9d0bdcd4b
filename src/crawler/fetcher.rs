//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the shared HTTP client
//! - Applying a request profile's user agent and headers
//! - Classifying failures, including rate-limit responses
//! - Reporting response latency to the rate governor
//!
//! Each call sends exactly one request. Retries belong to the caller, which
//! must reserve a governor slot before every attempt.

use crate::config::CrawlerConfig;
use crate::crawler::{parse_html, DomainGovernor, FailureKind};
use crate::stealth::RequestProfile;
use crate::url::extract_domain;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

/// Why a fetch did not produce a page
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection failure or timeout
    #[error("Network error: {message}")]
    Network { message: String, timeout: bool },

    /// Non-2xx response other than 429
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// HTTP 429
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// The response is not a page we can process
    #[error("Parse error: {message}")]
    Parse { message: String },
}

impl FetchError {
    /// Network errors and 5xx responses are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { status } => *status >= 500,
            Self::RateLimited { .. } | Self::Parse { .. } => false,
        }
    }

    /// Error kind recorded on a failed crawl result
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } => FailureKind::Network,
            Self::Http { .. } => FailureKind::Http,
            Self::RateLimited { .. } => FailureKind::RateLimit,
            Self::Parse { .. } => FailureKind::Parse,
        }
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Network {
                message: "Request timeout".to_string(),
                timeout: true,
            }
        } else if error.is_connect() {
            Self::Network {
                message: format!("Connection failed: {}", error),
                timeout: false,
            }
        } else if error.is_decode() {
            Self::Parse {
                message: format!("Undecodable body: {}", error),
            }
        } else {
            Self::Network {
                message: error.to_string(),
                timeout: false,
            }
        }
    }
}

/// A successfully fetched and parsed page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub content_type: String,
    pub title: Option<String>,
    /// Absolute links in document order
    pub links: Vec<String>,
    pub body: String,
    /// Readable characters, used for simulated reading time
    pub text_length: usize,
    /// Time from sending the request to receiving the full body
    pub latency: Duration,
}

/// The network seam of the crawler
///
/// The orchestrator only talks to the network through this trait, so tests can
/// substitute a scripted fetcher.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches and parses one page using `profile`'s identity
    async fn fetch(&self, url: &Url, profile: &RequestProfile) -> Result<FetchedPage, FetchError>;

    /// Fetches a plain-text resource such as robots.txt
    ///
    /// Returns `None` when the resource is missing or unreachable.
    async fn fetch_text(&self, url: &Url, profile: &RequestProfile) -> Option<String> {
        let _ = (url, profile);
        None
    }
}

/// Builds an HTTP client with proper configuration
///
/// The user agent is not set here; every request carries its profile's.
///
/// # Arguments
///
/// * `config` - The crawler configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use sumi_tide::config::CrawlerConfig;
/// use sumi_tide::crawler::build_http_client;
///
/// let client = build_http_client(&CrawlerConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout))
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`PageFetcher`] backed by reqwest
pub struct HttpFetcher {
    client: Client,
    governor: Option<Arc<DomainGovernor>>,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            governor: None,
        }
    }

    /// Reports every response latency to `governor`
    pub fn with_governor(mut self, governor: Arc<DomainGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    fn record_latency(&self, url: &Url, latency: Duration) {
        if let (Some(governor), Some(domain)) = (&self.governor, extract_domain(url)) {
            governor.record_response(&domain, latency);
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    /// Sends one request and classifies the response
    ///
    /// | Response | Result |
    /// |----------|--------|
    /// | HTTP 429 | `RateLimited`, with any `Retry-After` |
    /// | Other non-2xx | `Http` |
    /// | Timeout / connection error | `Network` |
    /// | 2xx that is not HTML | `Parse` |
    async fn fetch(&self, url: &Url, profile: &RequestProfile) -> Result<FetchedPage, FetchError> {
        let mut request = self
            .client
            .get(url.as_str())
            .header(USER_AGENT, profile.user_agent());
        for (name, value) in profile.headers() {
            request = request.header(name.as_str(), value.as_str());
        }

        let started = Instant::now();
        let response = request.send().await.map_err(FetchError::from_reqwest)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after: parse_retry_after(response.headers(), Utc::now()),
            });
        }

        if !status.is_success() {
            self.record_latency(url, started.elapsed());
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_html(&content_type) {
            return Err(FetchError::Parse {
                message: format!("Not an HTML page: {}", content_type),
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(FetchError::from_reqwest)?;
        let latency = started.elapsed();
        self.record_latency(url, latency);

        let parsed =
            parse_html(&body, &final_url).map_err(|message| FetchError::Parse { message })?;

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            content_type,
            title: parsed.title,
            links: parsed.links,
            body,
            text_length: parsed.text_length,
            latency,
        })
    }

    async fn fetch_text(&self, url: &Url, profile: &RequestProfile) -> Option<String> {
        let response = self
            .client
            .get(url.as_str())
            .header(USER_AGENT, profile.user_agent())
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!("No text at {} (HTTP {})", url, response.status().as_u16());
            return None;
        }

        response.text().await.ok()
    }
}

fn is_html(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
}

/// Reads a `Retry-After` header given in seconds or as an HTTP date
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}
