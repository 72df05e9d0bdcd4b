//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry logic
//! - HTML parsing and link extraction
//! - The URL frontier and per-domain pacing
//! - Overall crawl coordination

mod backoff;
mod coordinator;
mod fetcher;
mod frontier;
mod governor;
mod parser;
mod result;

pub use backoff::BackoffPolicy;
pub use coordinator::{
    AcceptAll, Coordinator, CoordinatorBuilder, CrawlHandle, CrawlStream, KeywordFilter,
    RelevanceFilter,
};
pub use fetcher::{build_http_client, FetchError, FetchedPage, HttpFetcher, PageFetcher};
pub use frontier::{Frontier, FrontierEntry, FrontierLimits};
pub use governor::{AdaptivePolicy, DomainGovernor};
pub use parser::{parse_html, ParsedPage};
pub use result::{CrawlOutcome, CrawlResult, FailureKind, PageContent, SkipReason};

use crate::config::Config;
use crate::TideError;

/// Starts a crawl with the default network stack
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Validate the configuration
/// 2. Build the HTTP client, governor and request profiles
/// 3. Admit the seed URL
/// 4. Spawn the crawl in the background
///
/// # Arguments
///
/// * `seed` - The first URL to crawl
/// * `config` - The crawler configuration
///
/// # Returns
///
/// * `Ok(CrawlHandle)` - Stream of results plus cancellation control
/// * `Err(TideError)` - Invalid configuration or seed
///
/// # Example
///
/// ```no_run
/// use sumi_tide::config::Config;
/// use sumi_tide::crawler::crawl;
///
/// # async fn demo() -> sumi_tide::Result<()> {
/// let mut handle = crawl("https://example.com/", Config::default())?;
/// while let Some(result) = handle.next().await {
///     println!("{} {}", result.url, result.outcome);
/// }
/// let stats = handle.finish().await?;
/// println!("{} pages", stats.total);
/// # Ok(())
/// # }
/// ```
pub fn crawl(seed: &str, config: Config) -> Result<CrawlHandle, TideError> {
    Coordinator::new(config)?.run(seed)
}
