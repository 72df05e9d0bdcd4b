use crate::url::DEFAULT_TRACKING_PARAMS;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Sumi-Tide
///
/// Every section is optional; a missing section falls back to its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,

    /// Per-domain floor delays in seconds, keyed by domain pattern
    #[serde(rename = "rate-limits")]
    pub rate_limits: BTreeMap<String, f64>,

    pub filters: FilterConfig,

    /// Rate-limit (HTTP 429) backoff
    pub backoff: BackoffConfig,

    pub adaptive: AdaptiveConfig,

    /// Connection-level retry policy
    pub retry: RetryConfig,

    pub human: HumanConfig,

    #[serde(rename = "user-agents")]
    pub user_agents: UserAgentConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum depth to crawl from the seed URL
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Hard cap on the number of pages fetched in one crawl
    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    /// Maximum number of concurrent fetch tasks
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: u32,

    /// Maximum number of in-flight fetches per domain
    #[serde(rename = "per-domain-concurrency")]
    pub per_domain_concurrency: u32,

    /// Whether links leaving the seed host are followed
    #[serde(rename = "follow-external-links")]
    pub follow_external_links: bool,

    /// Floor delay between requests to a domain without an override (seconds)
    #[serde(rename = "default-delay")]
    pub default_delay: f64,

    /// Whole-request timeout (seconds)
    #[serde(rename = "request-timeout")]
    pub request_timeout: u64,

    /// Connection establishment timeout (seconds)
    #[serde(rename = "connect-timeout")]
    pub connect_timeout: u64,

    /// Whether robots.txt rules and crawl delays are honored
    #[serde(rename = "respect-robots")]
    pub respect_robots: bool,

    /// Product token matched against robots.txt user-agent groups
    #[serde(rename = "robots-agent")]
    pub robots_agent: String,

    /// Time in-flight fetches get to finish after cancellation (seconds)
    #[serde(rename = "cancel-grace-period")]
    pub cancel_grace_period: f64,

    /// Keywords a page must mention before its links are followed
    pub keywords: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_pages: 100,
            max_concurrent: 5,
            per_domain_concurrency: 1,
            follow_external_links: false,
            default_delay: 1.0,
            request_timeout: 30,
            connect_timeout: 10,
            respect_robots: true,
            robots_agent: "sumi-tide".to_string(),
            cancel_grace_period: 30.0,
            keywords: Vec::new(),
        }
    }
}

/// URL filtering rules applied by the frontier
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Domains (and their subdomains) that are never fetched
    #[serde(rename = "blocked-domains")]
    pub blocked_domains: Vec<String>,

    /// Regular expressions matched against the normalized path and query
    #[serde(rename = "excluded-patterns")]
    pub excluded_patterns: Vec<String>,

    /// Path suffixes of non-page resources
    #[serde(rename = "skip-extensions")]
    pub skip_extensions: Vec<String>,

    /// Query parameters stripped during normalization (`utm_*` is always stripped)
    #[serde(rename = "tracking-params")]
    pub tracking_params: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            blocked_domains: to_strings(DEFAULT_BLOCKED_DOMAINS),
            excluded_patterns: to_strings(DEFAULT_EXCLUDED_PATTERNS),
            skip_extensions: to_strings(DEFAULT_SKIP_EXTENSIONS),
            tracking_params: to_strings(DEFAULT_TRACKING_PARAMS),
        }
    }
}

/// Backoff applied to a domain after it answers with HTTP 429
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(rename = "initial-delay")]
    pub initial_delay: f64,

    #[serde(rename = "max-delay")]
    pub max_delay: f64,

    pub multiplier: f64,

    /// Fraction of the delay added or removed at random
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: 5.0,
            max_delay: 300.0,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Latency-driven slowdown of a domain's minimum delay
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Responses slower than this (seconds) count as slow
    #[serde(rename = "slow-response-threshold")]
    pub slow_response_threshold: f64,

    /// Factor applied to the minimum delay after a slow response
    #[serde(rename = "adjustment-factor")]
    pub adjustment_factor: f64,

    /// Ceiling for the adapted minimum delay (seconds)
    #[serde(rename = "max-delay")]
    pub max_delay: f64,

    /// Consecutive fast responses needed before the delay decays
    #[serde(rename = "fast-responses-to-decay")]
    pub fast_responses_to_decay: u32,

    /// Factor applied on decay, in (0, 1)
    #[serde(rename = "decay-factor")]
    pub decay_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            slow_response_threshold: 2.0,
            adjustment_factor: 1.5,
            max_delay: 60.0,
            fast_responses_to_decay: 5,
            decay_factor: 0.9,
        }
    }
}

/// Retry policy for network errors and 5xx responses
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts for network errors and 5xx responses
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay")]
    pub base_delay: f64,

    #[serde(rename = "max-delay")]
    pub max_delay: f64,

    pub multiplier: f64,

    pub jitter: f64,

    /// Times a page is retried after HTTP 429 before giving up
    #[serde(rename = "rate-limit-retries")]
    pub rate_limit_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: 1.0,
            max_delay: 30.0,
            multiplier: 2.0,
            jitter: 0.25,
            rate_limit_retries: 3,
        }
    }
}

/// Human browsing simulation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HumanConfig {
    pub enabled: bool,

    /// Lower bound of the per-request "think" delay (seconds)
    #[serde(rename = "min-delay")]
    pub min_delay: f64,

    /// Upper bound of the per-request "think" delay (seconds)
    #[serde(rename = "max-delay")]
    pub max_delay: f64,

    #[serde(rename = "words-per-minute")]
    pub words_per_minute: u32,

    #[serde(rename = "max-reading-time")]
    pub max_reading_time: f64,

    #[serde(rename = "short-break-probability")]
    pub short_break_probability: f64,

    #[serde(rename = "short-break-range")]
    pub short_break_range: [f64; 2],

    /// Requests between forced long breaks; 0 disables long breaks
    #[serde(rename = "long-break-after-requests")]
    pub long_break_after_requests: u32,

    #[serde(rename = "long-break-range")]
    pub long_break_range: [f64; 2],

    /// Draw a new reader profile for every request instead of once per session
    #[serde(rename = "redraw-profile-per-request")]
    pub redraw_profile_per_request: bool,

    #[serde(rename = "profile-weights")]
    pub profile_weights: ProfileWeights,
}

impl Default for HumanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay: 0.5,
            max_delay: 2.0,
            words_per_minute: 240,
            max_reading_time: 30.0,
            short_break_probability: 0.05,
            short_break_range: [5.0, 15.0],
            long_break_after_requests: 50,
            long_break_range: [60.0, 180.0],
            redraw_profile_per_request: false,
            profile_weights: ProfileWeights::default(),
        }
    }
}

/// Relative weights of the reader profiles
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileWeights {
    pub fast: f64,
    pub normal: f64,
    pub slow: f64,
    pub curious: f64,
}

impl Default for ProfileWeights {
    fn default() -> Self {
        Self {
            fast: 0.2,
            normal: 0.5,
            slow: 0.15,
            curious: 0.15,
        }
    }
}

/// User-agent pools and rotation triggers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Requests served by one profile before it is replaced; 0 never rotates
    #[serde(rename = "rotate-after-requests")]
    pub rotate_after_requests: u32,

    /// Replace the profile as soon as a domain answers with HTTP 429
    #[serde(rename = "rotate-on-rate-limit")]
    pub rotate_on_rate_limit: bool,

    /// User-agent strings grouped by browser and OS
    pub pools: BTreeMap<String, Vec<String>>,

    /// Selection weight per pool; pools without a weight get 1
    pub weights: BTreeMap<String, u32>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        let pools = DEFAULT_USER_AGENTS
            .iter()
            .map(|(category, agents)| (category.to_string(), to_strings(agents)))
            .collect();
        let weights = DEFAULT_POOL_WEIGHTS
            .iter()
            .map(|(category, weight)| (category.to_string(), *weight))
            .collect();

        Self {
            rotate_after_requests: 25,
            rotate_on_rate_limit: true,
            pools,
            weights,
        }
    }
}

impl Config {
    /// Floor delay applied to domains without an override
    pub fn default_delay(&self) -> Duration {
        seconds(self.crawler.default_delay)
    }

    /// Grace period granted to in-flight fetches after cancellation
    pub fn cancel_grace_period(&self) -> Duration {
        seconds(self.crawler.cancel_grace_period)
    }
}

/// Converts a configured number of seconds into a `Duration`
///
/// Negative, NaN and out-of-range values collapse to zero; validation rejects
/// them for loaded configs.
pub fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    // Ad networks
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "amazon-adsystem.com",
    "adnxs.com",
    "taboola.com",
    "outbrain.com",
    // Analytics
    "google-analytics.com",
    "googletagmanager.com",
    "hotjar.com",
    "scorecardresearch.com",
    "quantserve.com",
    // Social widgets
    "facebook.com",
    "facebook.net",
    "twitter.com",
    "x.com",
    "instagram.com",
    "linkedin.com",
    "pinterest.com",
    "addthis.com",
    "sharethis.com",
    // Video players and payment
    "youtube.com",
    "vimeo.com",
    "paypal.com",
    "stripe.com",
];

const DEFAULT_EXCLUDED_PATTERNS: &[&str] = &[
    r"(?i)/(login|logout|log-in|log-out|signin|sign-in|signout|sign-out|register|signup|sign-up)(/|$|\?|\.)",
    r"(?i)/(print|share|email)(/|$|\?|\.)",
    r"(?i)[?&](print|share|email)=",
    r"(?i)/(assets|static|dist|build|vendor|bundles|_next|\.well-known|cdn-cgi)/",
    r"(?i)/wp-(content/plugins|content/themes|includes)/",
];

const DEFAULT_SKIP_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".pdf", ".zip", ".mp4", ".mp3", ".css", ".js", ".ico",
    ".xml", ".json", ".webp", ".svg", ".woff", ".woff2", ".ttf", ".eot", ".otf", ".mov", ".avi",
    ".wmv", ".flv", ".swf", ".exe", ".dmg", ".pkg", ".deb", ".rpm",
];

const DEFAULT_USER_AGENTS: &[(&str, &[&str])] = &[
    (
        "chrome-windows",
        &[
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        ],
    ),
    (
        "chrome-mac",
        &[
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        ],
    ),
    (
        "firefox-windows",
        &[
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
        ],
    ),
    (
        "firefox-mac",
        &[
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:120.0) Gecko/20100101 Firefox/120.0",
        ],
    ),
    (
        "safari-mac",
        &[
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        ],
    ),
    (
        "edge-windows",
        &[
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
        ],
    ),
    (
        "mobile",
        &[
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
            "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
        ],
    ),
];

const DEFAULT_POOL_WEIGHTS: &[(&str, u32)] = &[
    ("chrome-windows", 40),
    ("chrome-mac", 15),
    ("firefox-windows", 15),
    ("firefox-mac", 5),
    ("safari-mac", 15),
    ("edge-windows", 8),
    ("mobile", 2),
];
