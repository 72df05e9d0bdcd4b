//! URL handling module for Sumi-Tide
//!
//! This module provides URL normalization, domain extraction, wildcard matching,
//! and the filter rules that decide which discovered links may be crawled.

mod domain;
mod filter;
mod matcher;
mod normalize;

// Re-export main functions
pub use domain::{extract_domain, path_extension};
pub use filter::{Rejection, UrlFilter};
pub use matcher::matches_domain;
pub use normalize::{normalize_url, normalize_url_with, DEFAULT_TRACKING_PARAMS};
