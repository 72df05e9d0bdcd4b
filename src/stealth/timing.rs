//! Human-like delay model
//!
//! The governor decides the earliest moment a domain may be contacted again.
//! [`HumanTiming`] only ever lengthens that wait: think time, reading time
//! proportional to the previous page, and the occasional short or long break.

use crate::config::{seconds, HumanConfig};
use crate::stealth::RandomSource;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Average word length used to turn page size into a word count
const CHARS_PER_WORD: f64 = 5.0;

/// Reading behavior of a simulated visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderProfile {
    /// Skims pages and moves on quickly
    Fast,
    Normal,
    /// Reads everything, slowly
    Slow,
    /// Average pace, but lingers on content
    Curious,
}

impl ReaderProfile {
    const ALL: [ReaderProfile; 4] = [Self::Fast, Self::Normal, Self::Slow, Self::Curious];

    /// Multiplier applied to think time
    pub fn pace(&self) -> f64 {
        match self {
            Self::Fast => 0.6,
            Self::Normal => 1.0,
            Self::Slow => 2.0,
            Self::Curious => 1.5,
        }
    }

    /// Share of the page actually read
    pub fn reading_share(&self) -> f64 {
        match self {
            Self::Fast => 0.3,
            Self::Normal => 0.6,
            Self::Slow => 1.0,
            Self::Curious => 1.2,
        }
    }
}

struct TimingState {
    profile: Option<ReaderProfile>,
    requests_since_long_break: u32,
}

/// Adds human-looking variability on top of a politeness delay
pub struct HumanTiming {
    config: HumanConfig,
    random: Arc<dyn RandomSource>,
    state: Mutex<TimingState>,
}

impl HumanTiming {
    pub fn new(config: HumanConfig, random: Arc<dyn RandomSource>) -> Self {
        Self {
            config,
            random,
            state: Mutex::new(TimingState {
                profile: None,
                requests_since_long_break: 0,
            }),
        }
    }

    /// A timing model that returns every base delay unchanged
    pub fn disabled(random: Arc<dyn RandomSource>) -> Self {
        let config = HumanConfig {
            enabled: false,
            ..HumanConfig::default()
        };
        Self::new(config, random)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Lengthens a base delay with simulated human behavior
    ///
    /// # Arguments
    ///
    /// * `base` - The wait the rate governor requires
    /// * `content_length` - Size of the previously read page on this domain, if any
    ///
    /// # Returns
    ///
    /// A delay that is never shorter than `base`. When simulation is disabled,
    /// `base` itself.
    pub fn adjust(&self, base: Duration, content_length: Option<usize>) -> Duration {
        if !self.config.enabled {
            return base;
        }

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let profile = match state.profile {
            Some(profile) if !self.config.redraw_profile_per_request => profile,
            _ => {
                let profile = self.draw_profile();
                state.profile = Some(profile);
                profile
            }
        };

        let think =
            self.random.uniform(self.config.min_delay, self.config.max_delay) * profile.pace();
        let reading = content_length
            .map(|len| self.reading_time(len, profile))
            .unwrap_or(0.0);

        let mut pause = 0.0;
        if self.random.chance(self.config.short_break_probability) {
            let [low, high] = self.config.short_break_range;
            pause += self.random.uniform(low, high);
            tracing::debug!("Taking a short break of {:.1}s", pause);
        }

        if self.config.long_break_after_requests > 0 {
            state.requests_since_long_break += 1;
            if state.requests_since_long_break >= self.config.long_break_after_requests {
                let [low, high] = self.config.long_break_range;
                let long = self.random.uniform(low, high);
                tracing::info!(
                    "Taking a long break of {:.0}s after {} requests",
                    long,
                    state.requests_since_long_break
                );
                pause += long;
                state.requests_since_long_break = 0;
            }
        }

        let extra = (think + reading + pause).max(0.0);
        base + seconds(extra)
    }

    /// The reader profile currently in use, if one has been drawn
    pub fn profile(&self) -> Option<ReaderProfile> {
        match self.state.lock() {
            Ok(state) => state.profile,
            Err(poisoned) => poisoned.into_inner().profile,
        }
    }

    fn draw_profile(&self) -> ReaderProfile {
        let weights = &self.config.profile_weights;
        self.random
            .weighted_index(&[weights.fast, weights.normal, weights.slow, weights.curious])
            .map(|index| ReaderProfile::ALL[index])
            .unwrap_or(ReaderProfile::Normal)
    }

    fn reading_time(&self, content_length: usize, profile: ReaderProfile) -> f64 {
        if self.config.words_per_minute == 0 {
            return 0.0;
        }
        let words = content_length as f64 / CHARS_PER_WORD;
        let minutes = words / self.config.words_per_minute as f64;
        let secs = minutes * 60.0 * profile.reading_share() * self.random.uniform(0.8, 1.2);
        secs.min(self.config.max_reading_time)
    }
}
