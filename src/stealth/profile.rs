//! Request profiles: coherent user-agent, header set, and fingerprint seed
//!
//! A [`RequestProfile`] is immutable. The [`ProfileRotator`] hands the same profile
//! to many requests and swaps in a freshly generated one after a configured number
//! of requests, or immediately when a server rate-limits us.

use crate::config::UserAgentConfig;
use crate::stealth::RandomSource;
use std::fmt;
use std::sync::{Arc, Mutex};

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.9,es;q=0.8",
    "en-US,en;q=0.9,fr;q=0.8",
    "en-US,en;q=0.9,de;q=0.8",
    "en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7",
];

const CHROME_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const FIREFOX_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const SAFARI_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Browser family inferred from a user-agent string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserFamily {
    Chrome,
    Edge,
    Firefox,
    Safari,
}

impl BrowserFamily {
    /// Detects the family the way servers usually do: Edge before Chrome, Chrome before Safari
    pub fn detect(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        if ua.contains("edg/") {
            Self::Edge
        } else if ua.contains("firefox/") {
            Self::Firefox
        } else if ua.contains("chrome/") || ua.contains("crios/") {
            Self::Chrome
        } else if ua.contains("safari/") {
            Self::Safari
        } else {
            Self::Chrome
        }
    }
}

/// Opaque per-profile token for anything that must look stable within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FingerprintSeed(u64);

impl FingerprintSeed {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FingerprintSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifying request characteristics presented for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestProfile {
    user_agent: String,
    headers: Vec<(String, String)>,
    fingerprint: FingerprintSeed,
    browser: BrowserFamily,
    category: String,
}

impl RequestProfile {
    /// Builds a profile from explicit parts
    pub fn new(
        user_agent: impl Into<String>,
        headers: Vec<(String, String)>,
        fingerprint: u64,
    ) -> Self {
        let user_agent = user_agent.into();
        Self {
            browser: BrowserFamily::detect(&user_agent),
            user_agent,
            headers,
            fingerprint: FingerprintSeed(fingerprint),
            category: "custom".to_string(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Headers in the order a browser would send them, without `User-Agent`
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Looks up a header value, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn fingerprint(&self) -> FingerprintSeed {
        self.fingerprint
    }

    pub fn browser(&self) -> BrowserFamily {
        self.browser
    }

    /// Name of the user-agent pool this profile was drawn from
    pub fn category(&self) -> &str {
        &self.category
    }
}

/// Draws new profiles from weighted user-agent pools
pub struct ProfileGenerator {
    pools: Vec<(String, Vec<String>)>,
    weights: Vec<f64>,
    random: Arc<dyn RandomSource>,
    last_user_agent: Mutex<Option<String>>,
}

impl ProfileGenerator {
    /// Creates a generator over the configured pools
    ///
    /// Pools without an explicit weight get weight 1.
    pub fn from_config(config: &UserAgentConfig, random: Arc<dyn RandomSource>) -> Self {
        let pools: Vec<(String, Vec<String>)> = config
            .pools
            .iter()
            .filter(|(_, agents)| !agents.is_empty())
            .map(|(category, agents)| (category.clone(), agents.clone()))
            .collect();
        let weights = pools
            .iter()
            .map(|(category, _)| config.weights.get(category).copied().unwrap_or(1) as f64)
            .collect();

        Self {
            pools,
            weights,
            random,
            last_user_agent: Mutex::new(None),
        }
    }

    /// Generates a new profile
    ///
    /// The previous profile's user agent is avoided when its pool has alternatives.
    pub fn generate(&self) -> RequestProfile {
        let (category, user_agent) = self.pick_user_agent();
        let browser = BrowserFamily::detect(&user_agent);
        let headers = build_headers(browser, &user_agent, self.random.as_ref());
        let fingerprint = FingerprintSeed(self.random.next_u64());

        RequestProfile {
            user_agent,
            headers,
            fingerprint,
            browser,
            category,
        }
    }

    fn pick_user_agent(&self) -> (String, String) {
        let Some(pool_index) = self
            .random
            .weighted_index(&self.weights)
            .or(if self.pools.is_empty() { None } else { Some(0) })
        else {
            return ("fallback".to_string(), fallback_user_agent());
        };

        let (category, agents) = &self.pools[pool_index];
        let mut index = self.random.pick_index(agents.len()).unwrap_or(0);

        let mut last = match self.last_user_agent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if agents.len() > 1 && last.as_deref() == Some(agents[index].as_str()) {
            index = (index + 1) % agents.len();
        }
        let user_agent = agents[index].clone();
        *last = Some(user_agent.clone());

        (category.clone(), user_agent)
    }
}

fn fallback_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

/// Builds a header set consistent with the browser family
///
/// `Accept-Encoding` is left to the HTTP client so bodies stay decodable.
fn build_headers(
    browser: BrowserFamily,
    user_agent: &str,
    random: &dyn RandomSource,
) -> Vec<(String, String)> {
    let mut headers: Vec<(&str, String)> = Vec::new();

    match browser {
        BrowserFamily::Chrome | BrowserFamily::Edge => {
            let version = major_version(user_agent, "Chrome/").unwrap_or("120");
            let brand = if browser == BrowserFamily::Edge {
                "Microsoft Edge"
            } else {
                "Google Chrome"
            };
            headers.push((
                "sec-ch-ua",
                format!(
                    "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"{0}\", \"{1}\";v=\"{0}\"",
                    version, brand
                ),
            ));
            let mobile = if user_agent.contains("Mobile") { "?1" } else { "?0" };
            headers.push(("sec-ch-ua-mobile", mobile.to_string()));
            headers.push(("sec-ch-ua-platform", format!("\"{}\"", platform(user_agent))));
            headers.push(("Upgrade-Insecure-Requests", "1".to_string()));
            headers.push(("Accept", CHROME_ACCEPT.to_string()));
            push_fetch_metadata(&mut headers);
        }
        BrowserFamily::Firefox => {
            headers.push(("Accept", FIREFOX_ACCEPT.to_string()));
        }
        BrowserFamily::Safari => {
            headers.push(("Accept", SAFARI_ACCEPT.to_string()));
        }
    }

    let language_index = random.pick_index(ACCEPT_LANGUAGES.len()).unwrap_or(0);
    headers.push(("Accept-Language", ACCEPT_LANGUAGES[language_index].to_string()));

    if browser == BrowserFamily::Firefox {
        if random.chance(0.5) {
            headers.push(("DNT", "1".to_string()));
        }
        headers.push(("Upgrade-Insecure-Requests", "1".to_string()));
        push_fetch_metadata(&mut headers);
    }

    if random.chance(0.3) {
        headers.push(("Cache-Control", "no-cache".to_string()));
        headers.push(("Pragma", "no-cache".to_string()));
    }

    headers
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn push_fetch_metadata(headers: &mut Vec<(&str, String)>) {
    headers.push(("Sec-Fetch-Site", "none".to_string()));
    headers.push(("Sec-Fetch-Mode", "navigate".to_string()));
    headers.push(("Sec-Fetch-User", "?1".to_string()));
    headers.push(("Sec-Fetch-Dest", "document".to_string()));
}

fn major_version<'a>(user_agent: &'a str, marker: &str) -> Option<&'a str> {
    let start = user_agent.find(marker)? + marker.len();
    let rest = &user_agent[start..];
    let end = rest.find('.').unwrap_or(rest.len());
    let version = &rest[..end];
    (!version.is_empty()).then_some(version)
}

fn platform(user_agent: &str) -> &'static str {
    if user_agent.contains("Android") {
        "Android"
    } else if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Macintosh") || user_agent.contains("iPhone") {
        "macOS"
    } else {
        "Linux"
    }
}

struct RotationState {
    current: Arc<RequestProfile>,
    served: u32,
}

/// Shares one profile across requests and replaces it on schedule
pub struct ProfileRotator {
    generator: ProfileGenerator,
    rotate_after: u32,
    state: Mutex<RotationState>,
}

impl ProfileRotator {
    /// Creates a rotator; `rotate_after == 0` keeps one profile for the whole session
    pub fn new(generator: ProfileGenerator, rotate_after: u32) -> Self {
        let current = Arc::new(generator.generate());
        Self {
            generator,
            rotate_after,
            state: Mutex::new(RotationState { current, served: 0 }),
        }
    }

    /// Returns the profile for the next request, rotating first if it is used up
    pub fn checkout(&self) -> Arc<RequestProfile> {
        let mut state = self.lock_state();
        if self.rotate_after > 0 && state.served >= self.rotate_after {
            state.current = Arc::new(self.generator.generate());
            state.served = 0;
            tracing::debug!(
                "Rotated request profile after {} requests ({})",
                self.rotate_after,
                state.current.category()
            );
        }
        state.served += 1;
        Arc::clone(&state.current)
    }

    /// Replaces the current profile immediately
    pub fn rotate(&self) -> Arc<RequestProfile> {
        let mut state = self.lock_state();
        state.current = Arc::new(self.generator.generate());
        state.served = 0;
        tracing::info!(
            "Rotated request profile to {} ({})",
            state.current.category(),
            state.current.fingerprint()
        );
        Arc::clone(&state.current)
    }

    /// Returns the current profile without counting a request
    pub fn current(&self) -> Arc<RequestProfile> {
        Arc::clone(&self.lock_state().current)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RotationState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
