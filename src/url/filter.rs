//! Inclusion and exclusion rules for discovered URLs
//!
//! The filter owns the compiled form of the `[filters]` configuration section.
//! It normalizes raw links and decides whether a normalized URL may ever be fetched.

use crate::config::FilterConfig;
use crate::url::{extract_domain, matches_domain, normalize_url_with, path_extension};
use crate::{ConfigError, UrlError};
use regex::Regex;
use std::fmt;
use url::Url;

/// Why a URL was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The URL could not be parsed or normalized
    Malformed(String),
    /// The host is on the blocked-domain list
    BlockedDomain(String),
    /// The path ends in a non-page extension
    SkippedExtension(String),
    /// The path or query matched an excluded pattern
    ExcludedPattern(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed URL: {}", reason),
            Self::BlockedDomain(domain) => write!(f, "blocked domain {}", domain),
            Self::SkippedExtension(ext) => write!(f, "skipped extension {}", ext),
            Self::ExcludedPattern(pattern) => write!(f, "matched excluded pattern {}", pattern),
        }
    }
}

/// Compiled URL filter rules
#[derive(Debug, Clone)]
pub struct UrlFilter {
    blocked_domains: Vec<String>,
    excluded_patterns: Vec<Regex>,
    skip_extensions: Vec<String>,
    tracking_params: Vec<String>,
}

impl UrlFilter {
    /// Compiles the filter from configuration
    ///
    /// # Returns
    ///
    /// * `Ok(UrlFilter)` - All patterns compiled
    /// * `Err(ConfigError::InvalidPattern)` - An excluded pattern is not a valid regex
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        let excluded_patterns = config
            .excluded_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    ConfigError::InvalidPattern(format!("Excluded pattern '{}': {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            blocked_domains: config
                .blocked_domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            excluded_patterns,
            skip_extensions: config
                .skip_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            tracking_params: config
                .tracking_params
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        })
    }

    /// Normalizes a raw URL with this filter's tracking parameter list
    pub fn normalize(&self, raw: &str) -> Result<Url, UrlError> {
        normalize_url_with(raw, &self.tracking_params)
    }

    /// Checks a normalized URL against every rule
    pub fn check(&self, url: &Url) -> Result<(), Rejection> {
        let domain = extract_domain(url).ok_or_else(|| {
            Rejection::Malformed(UrlError::MissingDomain.to_string())
        })?;

        if let Some(blocked) = self
            .blocked_domains
            .iter()
            .find(|pattern| matches_domain(pattern, &domain))
        {
            return Err(Rejection::BlockedDomain(blocked.clone()));
        }

        if let Some(extension) = path_extension(url) {
            if self.skip_extensions.contains(&extension) {
                return Err(Rejection::SkippedExtension(extension));
            }
        }

        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        if let Some(pattern) = self
            .excluded_patterns
            .iter()
            .find(|pattern| pattern.is_match(&target))
        {
            return Err(Rejection::ExcludedPattern(pattern.as_str().to_string()));
        }

        Ok(())
    }

    /// Normalizes and checks a raw URL in one step
    pub fn accept(&self, raw: &str) -> Result<Url, Rejection> {
        let url = self
            .normalize(raw)
            .map_err(|e| Rejection::Malformed(e.to_string()))?;
        self.check(&url)?;
        Ok(url)
    }

    /// Returns true if the domain or one of its parents is blocked
    pub fn is_blocked_domain(&self, domain: &str) -> bool {
        self.blocked_domains
            .iter()
            .any(|pattern| matches_domain(pattern, domain))
    }
}
