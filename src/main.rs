//! Sumi-Tide main entry point
//!
//! This is the command-line interface for the Sumi-Tide crawler.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use sumi_tide::config::{load_config_with_hash, validate, Config};
use sumi_tide::crawler::{Coordinator, CrawlHandle};
use sumi_tide::output::print_statistics;
use tracing_subscriber::EnvFilter;

/// Sumi-Tide: A polite, rate-adaptive web crawler
///
/// Sumi-Tide crawls outward from a seed URL, pacing itself per domain,
/// backing off when servers push back and respecting robots.txt.
#[derive(Parser, Debug)]
#[command(name = "sumi-tide")]
#[command(version)]
#[command(about = "A polite, rate-adaptive web crawler", long_about = None)]
struct Cli {
    /// URL to start crawling from
    #[arg(value_name = "SEED")]
    seed: String,

    /// Path to TOML configuration file (built-in defaults if omitted)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Override crawler.max-pages
    #[arg(long, value_name = "N")]
    max_pages: Option<u32>,

    /// Override crawler.max-depth
    #[arg(long, value_name = "N")]
    max_depth: Option<u32>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    if let Some(max_pages) = cli.max_pages {
        config.crawler.max_pages = max_pages;
    }
    if let Some(max_depth) = cli.max_depth {
        config.crawler.max_depth = max_depth;
    }
    validate(&config).context("invalid configuration")?;

    if cli.dry_run {
        handle_dry_run(&config, &cli.seed);
        return Ok(());
    }

    handle_crawl(config, &cli.seed).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_tide=info,warn"),
            1 => EnvFilter::new("sumi_tide=debug,info"),
            2 => EnvFilter::new("sumi_tide=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config, seed: &str) {
    println!("=== Sumi-Tide Dry Run ===\n");
    println!("Seed: {}", seed);

    println!("\nCrawler Configuration:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max pages: {}", config.crawler.max_pages);
    println!(
        "  Concurrency: {} total, {} per domain",
        config.crawler.max_concurrent, config.crawler.per_domain_concurrency
    );
    println!("  Default delay: {:.2}s", config.crawler.default_delay);
    println!("  Follow external links: {}", config.crawler.follow_external_links);
    println!(
        "  Robots.txt: {}",
        if config.crawler.respect_robots {
            format!("respected as '{}'", config.crawler.robots_agent)
        } else {
            "ignored".to_string()
        }
    );
    if !config.crawler.keywords.is_empty() {
        println!("  Keywords: {}", config.crawler.keywords.join(", "));
    }

    println!("\nRate Limits ({}):", config.rate_limits.len());
    for (pattern, delay) in &config.rate_limits {
        println!("  - {}: {:.2}s", pattern, delay);
    }

    println!("\nBackoff:");
    println!(
        "  {:.1}s initial, x{} per failure, {:.1}s max, ±{:.0}% jitter",
        config.backoff.initial_delay,
        config.backoff.multiplier,
        config.backoff.max_delay,
        config.backoff.jitter * 100.0
    );

    println!("\nHuman Timing: {}", if config.human.enabled { "on" } else { "off" });
    println!(
        "User Agents: {} pools, rotate every {} requests",
        config.user_agents.pools.len(),
        config.user_agents.rotate_after_requests
    );
    println!(
        "Filters: {} blocked domains, {} excluded patterns, {} skipped extensions",
        config.filters.blocked_domains.len(),
        config.filters.excluded_patterns.len(),
        config.filters.skip_extensions.len()
    );

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, seed: &str) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(config).context("failed to set up crawler")?;
    let mut handle = coordinator.run(seed)?;

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight requests");
            cancel.cancel();
        }
    });

    print_results(&mut handle).await;

    match handle.finish().await {
        Ok(stats) => {
            println!();
            print_statistics(&stats);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

async fn print_results(handle: &mut CrawlHandle) {
    while let Some(result) = handle.next().await {
        match result.title() {
            Some(title) => println!(
                "[{}] {} {} \"{}\"",
                result.depth, result.outcome, result.url, title
            ),
            None => println!("[{}] {} {}", result.depth, result.outcome, result.url),
        }
        if result.is_keyword_match() {
            println!("    keywords: {}", result.matched_keywords.join(", "));
        }
    }
}
