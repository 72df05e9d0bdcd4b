//! Configuration module for Sumi-Tide
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional, so an empty file yields the built-in defaults.
//!
//! # Example
//!
//! ```no_run
//! use sumi_tide::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    seconds, AdaptiveConfig, BackoffConfig, Config, CrawlerConfig, FilterConfig, HumanConfig,
    ProfileWeights, RetryConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
