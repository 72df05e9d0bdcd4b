//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! Disallowed URLs are skipped and `Crawl-delay` raises the domain's floor delay.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache, RobotsVerdict};
pub use parser::ParsedRobots;
