//! Robots.txt caching implementation
//!
//! robots.txt is fetched once per origin and refreshed after 24 hours.

use crate::crawler::PageFetcher;
use crate::robots::ParsedRobots;
use crate::stealth::RequestProfile;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

/// Cached robots.txt data for an origin
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub content: Arc<ParsedRobots>,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content: Arc::new(content),
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the cached robots.txt is older than 24 hours
    pub fn is_stale(&self) -> bool {
        self.age() > Duration::hours(24)
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }
}

/// What robots.txt says about one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<std::time::Duration>,
}

/// Per-origin robots.txt cache
pub struct RobotsCache {
    agent: String,
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    /// Creates a cache that evaluates rules for `agent`
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Checks a URL, fetching its origin's robots.txt if needed
    ///
    /// # Arguments
    ///
    /// * `url` - The URL about to be crawled
    /// * `fetcher` - Used to download robots.txt
    /// * `profile` - Identity presented for the download
    ///
    /// # Returns
    ///
    /// The verdict for `url`. A robots.txt that cannot be fetched allows everything.
    pub async fn check(
        &self,
        url: &Url,
        fetcher: &dyn PageFetcher,
        profile: &RequestProfile,
    ) -> RobotsVerdict {
        let robots = self.rules_for(url, fetcher, profile).await;
        RobotsVerdict {
            allowed: robots.is_allowed(url.as_str(), &self.agent),
            crawl_delay: robots.crawl_delay(&self.agent),
        }
    }

    /// Rules for a URL's origin, from cache when fresh
    pub async fn rules_for(
        &self,
        url: &Url,
        fetcher: &dyn PageFetcher,
        profile: &RequestProfile,
    ) -> Arc<ParsedRobots> {
        let origin = url.origin().ascii_serialization();

        if let Some(cached) = self.cached(&origin) {
            return cached;
        }

        let robots = match url.join("/robots.txt") {
            Ok(robots_url) => match fetcher.fetch_text(&robots_url, profile).await {
                Some(body) => ParsedRobots::from_content(&body),
                None => ParsedRobots::allow_all(),
            },
            Err(_) => ParsedRobots::allow_all(),
        };
        tracing::debug!(
            "Loaded robots.txt for {} ({})",
            origin,
            if robots.is_allow_all() { "allow all" } else { "rules" }
        );

        let cached = CachedRobots::new(robots);
        let content = Arc::clone(&cached.content);
        self.lock().insert(origin, cached);
        content
    }

    /// Seeds the cache for an origin such as `https://example.com`
    pub fn insert(&self, origin: &str, robots: ParsedRobots) {
        self.lock()
            .insert(origin.to_string(), CachedRobots::new(robots));
    }

    /// True if rules for `url`'s origin are cached and fresh
    pub fn is_cached(&self, url: &Url) -> bool {
        self.cached(&url.origin().ascii_serialization()).is_some()
    }

    /// Number of origins cached, fresh or stale
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every cached robots.txt; the next check per origin fetches again
    pub fn clear(&self) {
        let mut entries = self.lock();
        tracing::debug!("Clearing {} cached robots.txt entries", entries.len());
        entries.clear();
    }

    fn cached(&self, origin: &str) -> Option<Arc<ParsedRobots>> {
        self.lock()
            .get(origin)
            .filter(|cached| !cached.is_stale())
            .map(|cached| Arc::clone(&cached.content))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedRobots>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
