//! Crawl statistics
//!
//! Accumulated by the coordinator as results are produced and returned when the
//! crawl finishes.

use crate::crawler::{CrawlOutcome, CrawlResult, FailureKind};
use crate::url::extract_domain;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStatistics {
    /// Results produced, one per dispatched URL
    pub total: u64,

    pub succeeded: u64,

    pub skipped: u64,

    pub failed: u64,

    /// Links extracted from successful pages
    pub links_discovered: u64,

    /// Successful pages that matched at least one keyword
    pub keyword_matches: u64,

    /// Failed results by terminal error kind
    pub failures_by_kind: HashMap<FailureKind, u64>,

    /// Domains that answered with HTTP 429 at least once
    pub rate_limited_domains: BTreeSet<String>,

    /// Distinct domains a result was produced for
    pub domains: BTreeSet<String>,

    /// Wall-clock time from start to the last result
    pub elapsed: Duration,
}

impl CrawlStatistics {
    /// Counts one result
    pub fn record(&mut self, result: &CrawlResult) {
        self.total += 1;
        if let Some(domain) = extract_domain(&result.url) {
            self.domains.insert(domain);
        }

        match &result.outcome {
            CrawlOutcome::Success { .. } => {
                self.succeeded += 1;
                self.links_discovered += result.extracted_links.len() as u64;
                if result.is_keyword_match() {
                    self.keyword_matches += 1;
                }
            }
            CrawlOutcome::Skipped { .. } => self.skipped += 1,
            CrawlOutcome::Failed { kind, .. } => {
                self.failed += 1;
                *self.failures_by_kind.entry(*kind).or_insert(0) += 1;
            }
        }
    }

    /// Notes a domain that rate-limited us, whether or not the page later succeeded
    pub fn record_rate_limited(&mut self, domain: &str) {
        self.rate_limited_domains.insert(domain.to_string());
    }

    /// Share of results that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64 * 100.0
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Pages crawled: {}", stats.total);
    println!("  Unique domains: {}", stats.domains.len());
    println!("  Links found: {}", stats.links_discovered);
    if stats.keyword_matches > 0 {
        println!("  Keyword matches: {}", stats.keyword_matches);
    }
    println!("  Elapsed: {:.1}s", stats.elapsed.as_secs_f64());
    println!();

    println!("Outcomes:");
    for (label, count) in [
        ("Succeeded", stats.succeeded),
        ("Skipped", stats.skipped),
        ("Failed", stats.failed),
    ] {
        let percentage = if stats.total > 0 {
            (count as f64 / stats.total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!();

    if !stats.failures_by_kind.is_empty() {
        println!("Error Summary:");
        let mut error_counts: Vec<_> = stats.failures_by_kind.iter().collect();
        error_counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

        for (kind, count) in error_counts {
            println!("  {}: {}", kind, count);
        }
        println!();
    }

    if !stats.rate_limited_domains.is_empty() {
        println!(
            "Rate Limited Domains ({}):",
            stats.rate_limited_domains.len()
        );
        for domain in &stats.rate_limited_domains {
            println!("  - {}", domain);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} pages successfully fetched)",
        stats.success_rate(),
        stats.succeeded,
        stats.total
    );
}
