//! Per-URL crawl results
//!
//! Every URL handed out by the frontier produces exactly one [`CrawlResult`],
//! whether it was fetched, skipped, or failed.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Terminal error kind of a failed URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Connection or timeout errors that outlived every retry
    Network,
    /// Server errors that outlived every retry
    Http,
    /// Still rate limited after the configured retries
    RateLimit,
    /// The response could not be processed as a page
    Parse,
    /// The fetch task panicked before producing a result
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Http => "http",
            Self::RateLimit => "rate-limit",
            Self::Parse => "parse",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a URL was not fetched or not used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Client error other than 429, e.g. 403 or 404
    HttpStatus(u16),
    /// robots.txt disallows the URL for our agent
    RobotsDisallowed,
    /// The crawl was cancelled before the fetch started
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpStatus(status) => write!(f, "HTTP {}", status),
            Self::RobotsDisallowed => f.write_str("disallowed by robots.txt"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    Success { status: u16 },
    Skipped { reason: SkipReason },
    Failed { kind: FailureKind, message: String },
}

impl CrawlOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for CrawlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { status } => write!(f, "OK {}", status),
            Self::Skipped { reason } => write!(f, "SKIPPED ({})", reason),
            Self::Failed { kind, message } => write!(f, "FAILED [{}] {}", kind, message),
        }
    }
}

/// Page content handed to downstream consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    /// URL the content was actually served from, after redirects
    pub final_url: Url,
    pub content_type: String,
    pub title: Option<String>,
    pub body: String,
}

/// Result record for one URL
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// Normalized URL that was dispatched
    pub url: Url,
    pub depth: u32,
    pub discovered_from: Option<Url>,
    pub outcome: CrawlOutcome,
    /// Links found on the page, in document order
    pub extracted_links: Vec<String>,
    /// Present only for successful fetches
    pub content: Option<PageContent>,
    /// Time from sending the request to receiving the full body
    pub latency: Option<Duration>,
    pub fetched_at: DateTime<Utc>,
    /// Configured keywords found on the page, in configuration order
    pub matched_keywords: Vec<String>,
}

impl CrawlResult {
    /// A result without content
    pub fn without_content(
        url: Url,
        depth: u32,
        discovered_from: Option<Url>,
        outcome: CrawlOutcome,
    ) -> Self {
        Self {
            url,
            depth,
            discovered_from,
            outcome,
            extracted_links: Vec::new(),
            content: None,
            latency: None,
            fetched_at: Utc::now(),
            matched_keywords: Vec::new(),
        }
    }

    pub fn skipped(url: Url, depth: u32, discovered_from: Option<Url>, reason: SkipReason) -> Self {
        Self::without_content(url, depth, discovered_from, CrawlOutcome::Skipped { reason })
    }

    pub fn failed(
        url: Url,
        depth: u32,
        discovered_from: Option<Url>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self::without_content(
            url,
            depth,
            discovered_from,
            CrawlOutcome::Failed {
                kind,
                message: message.into(),
            },
        )
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn title(&self) -> Option<&str> {
        self.content.as_ref().and_then(|c| c.title.as_deref())
    }

    /// True if any configured keyword was found on the page
    pub fn is_keyword_match(&self) -> bool {
        !self.matched_keywords.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/a").unwrap()
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(CrawlOutcome::Success { status: 200 }.to_string(), "OK 200");
        assert_eq!(
            CrawlOutcome::Skipped {
                reason: SkipReason::HttpStatus(404)
            }
            .to_string(),
            "SKIPPED (HTTP 404)"
        );
        assert_eq!(
            CrawlOutcome::Failed {
                kind: FailureKind::RateLimit,
                message: "gave up".to_string()
            }
            .to_string(),
            "FAILED [rate-limit] gave up"
        );
    }

    #[test]
    fn test_constructors() {
        let result = CrawlResult::skipped(url(), 1, None, SkipReason::RobotsDisallowed);
        assert!(!result.is_success());
        assert!(result.extracted_links.is_empty());
        assert!(result.title().is_none());
        assert!(!result.is_keyword_match());

        let result = CrawlResult::failed(url(), 2, Some(url()), FailureKind::Network, "timeout");
        assert_eq!(
            result.outcome,
            CrawlOutcome::Failed {
                kind: FailureKind::Network,
                message: "timeout".to_string()
            }
        );
        assert_eq!(result.discovered_from, Some(url()));
    }
}
