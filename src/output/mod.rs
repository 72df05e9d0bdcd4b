//! Output module for crawl summaries
//!
//! Persisting or exporting results is left to consumers of the result stream.
//! This module only aggregates and prints statistics.

pub mod stats;

pub use stats::{print_statistics, CrawlStatistics};
