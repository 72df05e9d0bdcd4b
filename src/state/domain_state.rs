use std::time::Duration;
use tokio::time::Instant;

/// Pacing state of one domain
///
/// All fields are mutated by the rate governor while it holds the domain's lock,
/// so reservation and backoff decisions are never interleaved.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Start time reserved for the most recent request to this domain
    pub last_request_time: Option<Instant>,

    /// Current minimum spacing between requests, never below the floor
    pub current_min_delay: Duration,

    /// Rate-limit responses since the last success
    pub consecutive_failures: u32,

    /// Requests reserved against this domain during the crawl
    pub request_count: u64,

    /// No request may start before this instant
    pub backoff_until: Option<Instant>,

    floor: Duration,
    fast_streak: u32,
}

impl DomainState {
    /// Creates state for a domain whose spacing may never drop below `floor`
    pub fn new(floor: Duration) -> Self {
        Self {
            last_request_time: None,
            current_min_delay: floor,
            consecutive_failures: 0,
            request_count: 0,
            backoff_until: None,
            floor,
            fast_streak: 0,
        }
    }

    /// The configured or robots-imposed minimum spacing
    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// Raises the floor, for example to honor a robots.txt crawl delay
    ///
    /// A lower value than the current floor is ignored.
    pub fn raise_floor(&mut self, floor: Duration) {
        if floor > self.floor {
            self.floor = floor;
            self.current_min_delay = self.current_min_delay.max(floor);
        }
    }

    /// Earliest instant the next request may start
    ///
    /// # Arguments
    ///
    /// * `now` - The current instant
    ///
    /// # Returns
    ///
    /// The latest of `now`, the previous reservation plus the minimum delay,
    /// and the end of any active backoff.
    pub fn earliest_start(&self, now: Instant) -> Instant {
        let mut earliest = now;

        if let Some(last) = self.last_request_time {
            earliest = earliest.max(last + self.current_min_delay);
        }

        if let Some(until) = self.backoff_until {
            earliest = earliest.max(until);
        }

        earliest
    }

    /// Reserves a request slot starting at `start`
    pub fn reserve(&mut self, start: Instant) {
        self.last_request_time = Some(start);
        self.request_count += 1;
    }

    /// Returns true while a rate-limit backoff is in effect
    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.backoff_until.map_or(false, |until| until > now)
    }

    /// Lengthens the minimum delay after a slow response
    ///
    /// The result is capped at `ceiling` but never drops below the floor.
    pub fn slow_down(&mut self, factor: f64, ceiling: Duration) {
        let slowed = self.current_min_delay.mul_f64(factor).min(ceiling);
        self.current_min_delay = slowed.max(self.floor);
        self.fast_streak = 0;
    }

    /// Counts a fast response and decays the minimum delay after `needed` in a row
    ///
    /// # Returns
    ///
    /// `true` if the minimum delay was decayed.
    pub fn record_fast(&mut self, needed: u32, decay_factor: f64) -> bool {
        if needed == 0 {
            return false;
        }

        self.fast_streak += 1;
        if self.fast_streak < needed {
            return false;
        }

        self.fast_streak = 0;
        let decayed = self.current_min_delay.mul_f64(decay_factor).max(self.floor);
        let changed = decayed != self.current_min_delay;
        self.current_min_delay = decayed;
        changed
    }

    /// Records a rate-limit response and blocks the domain for `delay`
    ///
    /// An existing, later backoff is never shortened.
    pub fn record_rate_limited(&mut self, delay: Duration, now: Instant) -> Instant {
        let until = now + delay;
        let until = match self.backoff_until {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        self.backoff_until = Some(until);
        self.consecutive_failures += 1;
        self.fast_streak = 0;
        until
    }

    /// Clears the failure count after a successful response
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }
}
