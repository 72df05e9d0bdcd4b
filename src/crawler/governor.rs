//! Per-domain rate governor
//!
//! The governor is the only owner of [`DomainState`]. Every caller that wants to
//! contact a domain asks it for a start time first, and reports back how the
//! domain responded. Calls for one domain are serialized by that domain's lock;
//! different domains never contend beyond a brief map lookup.

use crate::config::{seconds, Config};
use crate::crawler::BackoffPolicy;
use crate::state::DomainState;
use crate::stealth::RandomSource;
use crate::url::matches_domain;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Latency-driven delay adjustment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptivePolicy {
    pub slow_threshold: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub fast_responses_to_decay: u32,
    pub decay_factor: f64,
}

/// Serialized access to per-domain pacing state
pub struct DomainGovernor {
    default_floor: Duration,
    floors: Vec<(String, Duration)>,
    adaptive: AdaptivePolicy,
    backoff: BackoffPolicy,
    random: Arc<dyn RandomSource>,
    domains: Mutex<HashMap<String, Arc<Mutex<DomainState>>>>,
}

impl DomainGovernor {
    /// Creates a governor from the rate-limit, backoff and adaptive sections
    pub fn new(config: &Config, random: Arc<dyn RandomSource>) -> Self {
        let floors = config
            .rate_limits
            .iter()
            .map(|(pattern, delay)| (pattern.to_lowercase(), seconds(*delay)))
            .collect();

        Self {
            default_floor: config.default_delay(),
            floors,
            adaptive: AdaptivePolicy {
                slow_threshold: seconds(config.adaptive.slow_response_threshold),
                factor: config.adaptive.adjustment_factor,
                max_delay: seconds(config.adaptive.max_delay),
                fast_responses_to_decay: config.adaptive.fast_responses_to_decay,
                decay_factor: config.adaptive.decay_factor,
            },
            backoff: BackoffPolicy::from_backoff(&config.backoff),
            random,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Configured floor delay for a domain
    ///
    /// An exact entry wins. Otherwise the longest matching pattern applies, and
    /// domains without any match use the default delay.
    pub fn floor_for(&self, domain: &str) -> Duration {
        let domain = domain.to_lowercase();

        if let Some((_, delay)) = self.floors.iter().find(|(pattern, _)| *pattern == domain) {
            return *delay;
        }

        self.floors
            .iter()
            .filter(|(pattern, _)| matches_domain(pattern, &domain))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, delay)| *delay)
            .unwrap_or(self.default_floor)
    }

    /// Reserves the next request slot for a domain
    ///
    /// # Arguments
    ///
    /// * `domain` - The domain about to be contacted
    ///
    /// # Returns
    ///
    /// How long the caller must wait before sending. The domain's last request
    /// time is moved to now plus that wait before the lock is released, so two
    /// callers can never be authorized for overlapping windows.
    pub fn acquire(&self, domain: &str) -> Duration {
        self.acquire_adjusted_at(domain, Instant::now(), |wait| wait)
    }

    /// Like [`acquire`](Self::acquire), letting `adjust` lengthen the wait
    ///
    /// `adjust` runs while the domain is locked, so the reserved start time
    /// includes whatever it adds. A result shorter than the required wait is
    /// ignored.
    pub fn acquire_adjusted<F>(&self, domain: &str, adjust: F) -> Duration
    where
        F: FnOnce(Duration) -> Duration,
    {
        self.acquire_adjusted_at(domain, Instant::now(), adjust)
    }

    /// [`acquire`](Self::acquire) at an explicit instant
    pub fn acquire_at(&self, domain: &str, now: Instant) -> Duration {
        self.acquire_adjusted_at(domain, now, |wait| wait)
    }

    pub fn acquire_adjusted_at<F>(&self, domain: &str, now: Instant, adjust: F) -> Duration
    where
        F: FnOnce(Duration) -> Duration,
    {
        let entry = self.entry(domain);
        let mut state = lock(&entry);

        let required = state.earliest_start(now).saturating_duration_since(now);
        let wait = adjust(required).max(required);
        state.reserve(now + wait);

        tracing::trace!(
            "Reserved {} request #{} in {:?}",
            domain,
            state.request_count,
            wait
        );
        wait
    }

    /// Feeds an observed response latency into the adaptive delay
    pub fn record_response(&self, domain: &str, latency: Duration) {
        let entry = self.entry(domain);
        let mut state = lock(&entry);
        let adaptive = &self.adaptive;

        if latency > adaptive.slow_threshold {
            let before = state.current_min_delay;
            state.slow_down(adaptive.factor, adaptive.max_delay);
            if state.current_min_delay != before {
                tracing::info!(
                    "Slow response from {} ({:.1}s), delay {:?} -> {:?}",
                    domain,
                    latency.as_secs_f64(),
                    before,
                    state.current_min_delay
                );
            }
        } else if state.record_fast(adaptive.fast_responses_to_decay, adaptive.decay_factor) {
            tracing::debug!(
                "Fast responses from {}, delay decayed to {:?}",
                domain,
                state.current_min_delay
            );
        }
    }

    /// Starts or extends rate-limit backoff for a domain
    ///
    /// # Arguments
    ///
    /// * `domain` - The domain that answered with HTTP 429
    /// * `retry_after` - Server-requested wait, if the response carried one
    ///
    /// # Returns
    ///
    /// The backoff applied, measured from now.
    pub fn record_rate_limited(&self, domain: &str, retry_after: Option<Duration>) -> Duration {
        self.record_rate_limited_at(domain, retry_after, Instant::now())
    }

    pub fn record_rate_limited_at(
        &self,
        domain: &str,
        retry_after: Option<Duration>,
        now: Instant,
    ) -> Duration {
        let entry = self.entry(domain);
        let mut state = lock(&entry);

        let mut delay = self
            .backoff
            .delay_for(state.consecutive_failures, self.random.as_ref());
        if let Some(requested) = retry_after {
            delay = delay.max(requested.min(self.backoff.max));
        }

        state.record_rate_limited(delay, now);
        tracing::warn!(
            "Rate limited by {} ({} in a row), backing off {:.1}s",
            domain,
            state.consecutive_failures,
            delay.as_secs_f64()
        );
        delay
    }

    /// Clears the failure streak after a successful response
    pub fn record_success(&self, domain: &str) {
        let entry = self.entry(domain);
        lock(&entry).record_success();
    }

    /// Raises a domain's floor to honor a robots.txt crawl delay
    pub fn set_crawl_delay(&self, domain: &str, delay: Duration) {
        let entry = self.entry(domain);
        let mut state = lock(&entry);
        if delay > state.floor() {
            tracing::info!("Honoring crawl delay of {:?} for {}", delay, domain);
            state.raise_floor(delay);
        }
    }

    /// Copy of a domain's state, if the domain has been seen
    pub fn snapshot(&self, domain: &str) -> Option<DomainState> {
        let entry = lock(&self.domains).get(domain).cloned()?;
        let state = lock(&entry).clone();
        Some(state)
    }

    /// Number of domains tracked so far
    pub fn domain_count(&self) -> usize {
        lock(&self.domains).len()
    }

    /// Forgets the state of one domain, or of every domain when `None`
    ///
    /// A forgotten domain starts again from its configured floor, with no
    /// backoff and no adaptive slowdown.
    pub fn reset(&self, domain: Option<&str>) {
        let mut domains = lock(&self.domains);
        match domain {
            Some(domain) => {
                if domains.remove(domain).is_some() {
                    tracing::debug!("Reset rate state for {}", domain);
                }
            }
            None => {
                tracing::debug!("Reset rate state for {} domains", domains.len());
                domains.clear();
            }
        }
    }

    fn entry(&self, domain: &str) -> Arc<Mutex<DomainState>> {
        let mut domains = lock(&self.domains);
        if let Some(entry) = domains.get(domain) {
            return Arc::clone(entry);
        }
        let entry = Arc::new(Mutex::new(DomainState::new(self.floor_for(domain))));
        domains.insert(domain.to_string(), Arc::clone(&entry));
        entry
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
