//! Sumi-Tide: A polite, rate-adaptive web crawler
//!
//! This crate implements a breadth-first web crawler that paces itself per domain,
//! backs off when servers push back, and presents coherent browser-like request
//! profiles with human-looking timing between requests.

pub mod config;
pub mod crawler;
pub mod output;
pub mod robots;
pub mod state;
pub mod stealth;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Sumi-Tide operations
///
/// Only conditions that abort a whole crawl surface here. Per-page failures are
/// reported as [`crawler::CrawlResult`] values instead.
#[derive(Debug, Error)]
pub enum TideError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid seed URL '{url}': {reason}")]
    InvalidSeed { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Crawl did not stop within the {grace:?} cancellation grace period")]
    CancellationTimeout { grace: Duration },

    #[error("Crawl task failed: {0}")]
    Driver(String),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Tide operations
pub type Result<T> = std::result::Result<T, TideError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, CrawlHandle, CrawlOutcome, CrawlResult, DomainGovernor, Frontier};
pub use state::DomainState;
pub use stealth::{HumanTiming, RandomSource, RequestProfile};
pub use url::{extract_domain, normalize_url};
