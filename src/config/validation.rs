use crate::config::types::{
    AdaptiveConfig, BackoffConfig, Config, CrawlerConfig, FilterConfig, HumanConfig, RetryConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use regex::Regex;
use std::collections::BTreeMap;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_rate_limits(&config.rate_limits)?;
    validate_filter_config(&config.filters)?;
    validate_backoff_config(&config.backoff)?;
    validate_adaptive_config(&config.adaptive)?;
    validate_retry_config(&config.retry)?;
    validate_human_config(&config.human)?;
    validate_user_agent_config(&config.user_agents)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent must be between 1 and 100, got {}",
            config.max_concurrent
        )));
    }

    if config.per_domain_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "per-domain-concurrency must be >= 1, got {}",
            config.per_domain_concurrency
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.request_timeout < 1 {
        return Err(ConfigError::Validation(
            "request-timeout must be at least 1 second".to_string(),
        ));
    }

    if config.robots_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "robots-agent cannot be empty".to_string(),
        ));
    }

    validate_seconds("default-delay", config.default_delay)?;
    validate_seconds("cancel-grace-period", config.cancel_grace_period)?;

    Ok(())
}

/// Validates per-domain floor delays
fn validate_rate_limits(rate_limits: &BTreeMap<String, f64>) -> Result<(), ConfigError> {
    for (pattern, delay) in rate_limits {
        validate_domain_pattern(pattern)?;
        validate_seconds(&format!("rate-limits.{}", pattern), *delay)?;
    }
    Ok(())
}

/// Validates URL filter rules
fn validate_filter_config(config: &FilterConfig) -> Result<(), ConfigError> {
    for domain in &config.blocked_domains {
        validate_domain_pattern(domain)?;
    }

    for pattern in &config.excluded_patterns {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("Excluded pattern '{}': {}", pattern, e))
        })?;
    }

    for extension in &config.skip_extensions {
        if !extension.starts_with('.') || extension.len() < 2 {
            return Err(ConfigError::Validation(format!(
                "skip-extensions entries must look like '.ext', got '{}'",
                extension
            )));
        }
    }

    Ok(())
}

/// Validates rate-limit backoff parameters
fn validate_backoff_config(config: &BackoffConfig) -> Result<(), ConfigError> {
    validate_seconds("backoff.initial-delay", config.initial_delay)?;
    validate_seconds("backoff.max-delay", config.max_delay)?;

    if config.max_delay < config.initial_delay {
        return Err(ConfigError::Validation(format!(
            "backoff.max-delay ({}) must be >= backoff.initial-delay ({})",
            config.max_delay, config.initial_delay
        )));
    }

    validate_growth("backoff", config.multiplier, config.jitter)
}

/// Validates adaptive delay parameters
fn validate_adaptive_config(config: &AdaptiveConfig) -> Result<(), ConfigError> {
    validate_seconds("adaptive.slow-response-threshold", config.slow_response_threshold)?;
    validate_seconds("adaptive.max-delay", config.max_delay)?;

    if config.adjustment_factor <= 1.0 || !config.adjustment_factor.is_finite() {
        return Err(ConfigError::Validation(format!(
            "adaptive.adjustment-factor must be > 1, got {}",
            config.adjustment_factor
        )));
    }

    if config.decay_factor.is_nan() || config.decay_factor <= 0.0 || config.decay_factor >= 1.0 {
        return Err(ConfigError::Validation(format!(
            "adaptive.decay-factor must be between 0 and 1 (exclusive), got {}",
            config.decay_factor
        )));
    }

    if config.fast_responses_to_decay < 1 {
        return Err(ConfigError::Validation(
            "adaptive.fast-responses-to-decay must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates connection-level retry parameters
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "retry.max-attempts must be >= 1".to_string(),
        ));
    }

    validate_seconds("retry.base-delay", config.base_delay)?;
    validate_seconds("retry.max-delay", config.max_delay)?;

    if config.max_delay < config.base_delay {
        return Err(ConfigError::Validation(format!(
            "retry.max-delay ({}) must be >= retry.base-delay ({})",
            config.max_delay, config.base_delay
        )));
    }

    validate_growth("retry", config.multiplier, config.jitter)
}

/// Validates human behavior simulation parameters
fn validate_human_config(config: &HumanConfig) -> Result<(), ConfigError> {
    validate_range("human.min-delay/max-delay", [config.min_delay, config.max_delay])?;
    validate_range("human.short-break-range", config.short_break_range)?;
    validate_range("human.long-break-range", config.long_break_range)?;
    validate_seconds("human.max-reading-time", config.max_reading_time)?;

    if config.words_per_minute < 1 {
        return Err(ConfigError::Validation(
            "human.words-per-minute must be >= 1".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.short_break_probability) {
        return Err(ConfigError::Validation(format!(
            "human.short-break-probability must be between 0 and 1, got {}",
            config.short_break_probability
        )));
    }

    let weights = &config.profile_weights;
    let all = [weights.fast, weights.normal, weights.slow, weights.curious];
    if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ConfigError::Validation(
            "human.profile-weights must be finite and non-negative".to_string(),
        ));
    }
    if all.iter().sum::<f64>() <= 0.0 {
        return Err(ConfigError::Validation(
            "human.profile-weights must not all be zero".to_string(),
        ));
    }

    Ok(())
}

/// Validates user-agent pools
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.pools.is_empty() {
        return Err(ConfigError::Validation(
            "user-agents.pools must define at least one pool".to_string(),
        ));
    }

    for (category, agents) in &config.pools {
        if agents.is_empty() || agents.iter().any(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "user-agent pool '{}' must contain non-empty user agents",
                category
            )));
        }
    }

    let selectable = config
        .pools
        .keys()
        .any(|category| config.weights.get(category).copied().unwrap_or(1) > 0);
    if !selectable {
        return Err(ConfigError::Validation(
            "every user-agent pool has weight 0".to_string(),
        ));
    }

    Ok(())
}

/// Checks that successive jittered delays keep growing
///
/// With multiplier `m` and jitter `j`, the lowest draw of step `k + 1` stays
/// above the highest draw of step `k` only while `j < (m - 1) / (m + 1)`.
fn validate_growth(section: &str, multiplier: f64, jitter: f64) -> Result<(), ConfigError> {
    if multiplier <= 1.0 || !multiplier.is_finite() {
        return Err(ConfigError::Validation(format!(
            "{}.multiplier must be > 1, got {}",
            section, multiplier
        )));
    }

    let limit = (multiplier - 1.0) / (multiplier + 1.0);
    if !(0.0..limit).contains(&jitter) {
        return Err(ConfigError::Validation(format!(
            "{}.jitter must be in [0, {:.3}) for multiplier {}, got {}",
            section, limit, multiplier, jitter
        )));
    }

    Ok(())
}

fn validate_seconds(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, value
        )));
    }
    Ok(())
}

fn validate_range(name: &str, range: [f64; 2]) -> Result<(), ConfigError> {
    validate_seconds(name, range[0])?;
    validate_seconds(name, range[1])?;
    if range[0] > range[1] {
        return Err(ConfigError::Validation(format!(
            "{} lower bound {} exceeds upper bound {}",
            name, range[0], range[1]
        )));
    }
    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}
