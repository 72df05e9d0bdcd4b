//! Crawl frontier
//!
//! The frontier owns every URL the crawl knows about: pending entries in
//! breadth-first order, entries handed out and not yet finished, and visited
//! URLs. All three sets are keyed by the normalized URL and a URL is in at most
//! one of them. Every method takes `&self` and is safe to call from many tasks.

use crate::url::{extract_domain, Rejection, UrlFilter};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// A URL waiting to be crawled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Normalized URL
    pub url: Url,
    /// Link distance from the seed, which sits at depth 0
    pub depth: u32,
    /// Page the URL was found on
    pub discovered_from: Option<Url>,
}

/// Bounds on what the frontier will admit and hand out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierLimits {
    pub max_depth: u32,
    /// Entries handed out by `next` over the whole crawl
    pub max_pages: u32,
    /// When set, only URLs on this host are admitted
    pub scope: Option<String>,
}

#[derive(Debug, Default)]
struct FrontierSets {
    pending: VecDeque<FrontierEntry>,
    pending_keys: HashSet<String>,
    in_flight: HashSet<String>,
    visited: HashSet<String>,
    dispatched: u32,
}

impl FrontierSets {
    fn knows(&self, key: &str) -> bool {
        self.pending_keys.contains(key) || self.in_flight.contains(key) || self.visited.contains(key)
    }
}

/// Pending, in-flight and visited URL tracking with filtering and budgets
pub struct Frontier {
    filter: UrlFilter,
    limits: FrontierLimits,
    sets: Mutex<FrontierSets>,
}

impl Frontier {
    pub fn new(filter: UrlFilter, limits: FrontierLimits) -> Self {
        Self {
            filter,
            limits,
            sets: Mutex::new(FrontierSets::default()),
        }
    }

    pub fn limits(&self) -> &FrontierLimits {
        &self.limits
    }

    /// Admits the seed URL at depth 0
    ///
    /// Scope is not applied to the seed. Unlike [`offer`](Self::offer), the
    /// reason for a refusal is returned.
    pub fn seed(&self, raw: &str) -> Result<Url, Rejection> {
        let url = self.filter.accept(raw)?;
        let mut sets = self.lock();
        if sets.knows(url.as_str()) {
            return Ok(url);
        }
        sets.pending_keys.insert(url.to_string());
        sets.pending.push_back(FrontierEntry {
            url: url.clone(),
            depth: 0,
            discovered_from: None,
        });
        Ok(url)
    }

    /// Offers a discovered link
    ///
    /// # Arguments
    ///
    /// * `raw` - The link as found, absolute
    /// * `depth` - Depth the link would be crawled at
    /// * `parent` - Normalized URL of the page the link was found on
    ///
    /// # Returns
    ///
    /// `true` if the link was queued. Rejected links are dropped silently:
    /// malformed, filtered, out of scope, too deep, an anchor back into the
    /// parent page, or already known.
    pub fn offer(&self, raw: &str, depth: u32, parent: Option<&Url>) -> bool {
        if depth > self.limits.max_depth {
            return false;
        }

        let url = match self.filter.normalize(raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::trace!("Dropping link {}: {}", raw, e);
                return false;
            }
        };

        if raw.contains('#') && parent == Some(&url) {
            return false;
        }

        if let Err(rejection) = self.filter.check(&url) {
            tracing::debug!("Filtered {}: {}", url, rejection);
            return false;
        }

        if let Some(scope) = &self.limits.scope {
            if extract_domain(&url).as_deref() != Some(scope.as_str()) {
                return false;
            }
        }

        let mut sets = self.lock();
        let key = url.to_string();
        if sets.knows(&key) {
            return false;
        }

        sets.pending_keys.insert(key);
        sets.pending.push_back(FrontierEntry {
            url,
            depth,
            discovered_from: parent.cloned(),
        });
        true
    }

    /// Hands out the oldest pending entry
    ///
    /// Returns `None` when nothing is pending or the page budget is spent; the
    /// budget is a hard stop even with entries still pending.
    pub fn next(&self) -> Option<FrontierEntry> {
        self.next_where(|_| true)
    }

    /// Hands out the oldest pending entry accepted by `eligible`
    ///
    /// Entries passed over keep their place in the queue.
    pub fn next_where<F>(&self, mut eligible: F) -> Option<FrontierEntry>
    where
        F: FnMut(&FrontierEntry) -> bool,
    {
        let mut sets = self.lock();
        if sets.dispatched >= self.limits.max_pages {
            return None;
        }

        let index = sets.pending.iter().position(|entry| eligible(entry))?;
        let entry = sets.pending.remove(index)?;
        let key = entry.url.to_string();
        sets.pending_keys.remove(&key);
        sets.in_flight.insert(key);
        sets.dispatched += 1;
        Some(entry)
    }

    /// Records a pending or in-flight URL as visited
    ///
    /// Returns `false`, leaving the frontier untouched, for a URL the frontier
    /// does not hold or has already visited. A pending URL skips the queue but
    /// still spends one unit of the page budget, and is refused once the
    /// budget is gone, so the visited set never outgrows `max_pages`.
    pub fn mark_visited(&self, url: &Url) -> bool {
        let mut sets = self.lock();
        let key = url.to_string();
        if sets.in_flight.remove(&key) {
            return sets.visited.insert(key);
        }
        if !sets.pending_keys.contains(&key) || sets.dispatched >= self.limits.max_pages {
            return false;
        }
        sets.pending_keys.remove(&key);
        sets.pending.retain(|entry| entry.url != *url);
        sets.dispatched += 1;
        sets.visited.insert(key)
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.lock().visited.contains(url.as_str())
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn visited_count(&self) -> usize {
        self.lock().visited.len()
    }

    /// Entries handed out so far
    pub fn dispatched(&self) -> u32 {
        self.lock().dispatched
    }

    /// True once `next` can never return another entry
    pub fn is_exhausted(&self) -> bool {
        let sets = self.lock();
        sets.dispatched >= self.limits.max_pages
            || (sets.pending.is_empty() && sets.in_flight.is_empty())
    }

    fn lock(&self) -> MutexGuard<'_, FrontierSets> {
        match self.sets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
