//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl driver that coordinates all aspects of
//! the crawling process, including:
//! - Dispatching frontier entries under global and per-domain concurrency caps
//! - Asking the governor for a start time and stretching it with human timing
//! - Robots.txt checks, rate-limit escalation and profile rotation
//! - Feeding discovered links back into the frontier
//! - Streaming results to the caller and cooperative cancellation

use crate::config::Config;
use crate::crawler::{
    build_http_client, BackoffPolicy, CrawlOutcome, CrawlResult, DomainGovernor, FailureKind,
    FetchError, Frontier, FrontierEntry, FrontierLimits, HttpFetcher, PageContent, PageFetcher,
    SkipReason,
};
use crate::output::CrawlStatistics;
use crate::robots::RobotsCache;
use crate::stealth::{HumanTiming, ProfileGenerator, ProfileRotator, RandomSource, ThreadRandom};
use crate::url::{extract_domain, UrlFilter};
use crate::TideError;
use chrono::Utc;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Decides whether a successful page's links are worth following
pub trait RelevanceFilter: Send + Sync {
    fn should_expand(&self, result: &CrawlResult) -> bool;

    /// Keywords found on a successful page, stored on its result
    fn matched_keywords(&self, result: &CrawlResult) -> Vec<String> {
        let _ = result;
        Vec::new()
    }
}

impl<F> RelevanceFilter for F
where
    F: Fn(&CrawlResult) -> bool + Send + Sync,
{
    fn should_expand(&self, result: &CrawlResult) -> bool {
        self(result)
    }
}

/// Follows every page's links
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl RelevanceFilter for AcceptAll {
    fn should_expand(&self, _result: &CrawlResult) -> bool {
        true
    }
}

/// Follows links only from pages mentioning at least one keyword
///
/// Matching is case-insensitive over the URL, title and body. An empty keyword
/// list follows everything.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    /// (as configured, lowercased)
    keywords: Vec<(String, String)>,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.as_ref().trim())
                .filter(|k| !k.is_empty())
                .map(|k| (k.to_string(), k.to_lowercase()))
                .collect(),
        }
    }

    /// Keywords found in `result`, as configured and in configuration order
    pub fn matches(&self, result: &CrawlResult) -> Vec<String> {
        if self.keywords.is_empty() {
            return Vec::new();
        }

        let mut haystack = result.url.as_str().to_lowercase();
        if let Some(content) = &result.content {
            if let Some(title) = &content.title {
                haystack.push(' ');
                haystack.push_str(&title.to_lowercase());
            }
            haystack.push(' ');
            haystack.push_str(&content.body.to_lowercase());
        }

        self.keywords
            .iter()
            .filter(|(_, lowered)| haystack.contains(lowered.as_str()))
            .map(|(keyword, _)| keyword.clone())
            .collect()
    }
}

impl RelevanceFilter for KeywordFilter {
    fn should_expand(&self, result: &CrawlResult) -> bool {
        self.keywords.is_empty() || !self.matches(result).is_empty()
    }

    fn matched_keywords(&self, result: &CrawlResult) -> Vec<String> {
        self.matches(result)
    }
}

/// Builds a [`Coordinator`], letting tests replace the network and randomness
pub struct CoordinatorBuilder {
    config: Config,
    random: Option<Arc<dyn RandomSource>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    relevance: Option<Arc<dyn RelevanceFilter>>,
}

impl CoordinatorBuilder {
    /// Randomness for jitter, profiles and human timing
    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    /// Replaces the reqwest-backed fetcher
    pub fn fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replaces the keyword filter built from `crawler.keywords`
    pub fn relevance_filter(mut self, filter: Arc<dyn RelevanceFilter>) -> Self {
        self.relevance = Some(filter);
        self
    }

    /// Validates the configuration and wires the components together
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run crawls
    /// * `Err(TideError::Config)` - The configuration is invalid
    /// * `Err(TideError::HttpClient)` - The HTTP client could not be built
    pub fn build(self) -> Result<Coordinator, TideError> {
        let config = self.config;
        crate::config::validate(&config)?;

        let random = self.random.unwrap_or_else(|| Arc::new(ThreadRandom));
        let filter = UrlFilter::from_config(&config.filters)?;
        let governor = Arc::new(DomainGovernor::new(&config, Arc::clone(&random)));

        let fetcher: Arc<dyn PageFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let client = build_http_client(&config.crawler)?;
                let fetcher = HttpFetcher::new(client).with_governor(Arc::clone(&governor));
                Arc::new(fetcher)
            }
        };

        let relevance: Arc<dyn RelevanceFilter> = match self.relevance {
            Some(relevance) => relevance,
            None if config.crawler.keywords.is_empty() => Arc::new(AcceptAll),
            None => Arc::new(KeywordFilter::new(&config.crawler.keywords)),
        };

        let generator = ProfileGenerator::from_config(&config.user_agents, Arc::clone(&random));
        let profiles = Arc::new(ProfileRotator::new(
            generator,
            config.user_agents.rotate_after_requests,
        ));
        let timing = Arc::new(HumanTiming::new(config.human.clone(), Arc::clone(&random)));
        let robots = config
            .crawler
            .respect_robots
            .then(|| Arc::new(RobotsCache::new(config.crawler.robots_agent.clone())));

        Ok(Coordinator {
            retry: BackoffPolicy::from_retry(&config.retry),
            config: Arc::new(config),
            filter,
            random,
            governor,
            timing,
            profiles,
            fetcher,
            robots,
            relevance,
        })
    }
}

/// Main crawler coordinator structure
///
/// One coordinator may run several crawls; the governor, profile rotation and
/// robots cache are shared between them.
pub struct Coordinator {
    config: Arc<Config>,
    filter: UrlFilter,
    random: Arc<dyn RandomSource>,
    /// Spacing between attempts after a network error or 5xx response
    retry: BackoffPolicy,
    governor: Arc<DomainGovernor>,
    timing: Arc<HumanTiming>,
    profiles: Arc<ProfileRotator>,
    fetcher: Arc<dyn PageFetcher>,
    robots: Option<Arc<RobotsCache>>,
    relevance: Arc<dyn RelevanceFilter>,
}

impl Coordinator {
    pub fn builder(config: Config) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            random: None,
            fetcher: None,
            relevance: None,
        }
    }

    /// Creates a coordinator with the default network stack
    pub fn new(config: Config) -> Result<Self, TideError> {
        Self::builder(config).build()
    }

    pub fn governor(&self) -> &Arc<DomainGovernor> {
        &self.governor
    }

    /// The robots.txt cache, absent when robots.txt is ignored
    pub fn robots(&self) -> Option<&Arc<RobotsCache>> {
        self.robots.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a crawl from `seed`
    ///
    /// The crawl runs in a background task and produces results through the
    /// returned handle. Must be called from within a tokio runtime.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlHandle)` - The crawl has started
    /// * `Err(TideError::InvalidSeed)` - The seed is malformed or filtered out
    pub fn run(&self, seed: &str) -> Result<CrawlHandle, TideError> {
        let invalid = |reason: String| TideError::InvalidSeed {
            url: seed.to_string(),
            reason,
        };

        let seed_url = self.filter.accept(seed).map_err(|r| invalid(r.to_string()))?;
        let scope = if self.config.crawler.follow_external_links {
            None
        } else {
            extract_domain(&seed_url)
        };

        let frontier = Frontier::new(
            self.filter.clone(),
            FrontierLimits {
                max_depth: self.config.crawler.max_depth,
                max_pages: self.config.crawler.max_pages,
                scope,
            },
        );
        frontier
            .seed(seed_url.as_str())
            .map_err(|r| invalid(r.to_string()))?;

        let cancel = CancellationToken::new();
        let context = Arc::new(CrawlContext {
            config: Arc::clone(&self.config),
            frontier,
            governor: Arc::clone(&self.governor),
            timing: Arc::clone(&self.timing),
            profiles: Arc::clone(&self.profiles),
            fetcher: Arc::clone(&self.fetcher),
            robots: self.robots.clone(),
            relevance: Arc::clone(&self.relevance),
            random: Arc::clone(&self.random),
            retry: self.retry,
            cancel: cancel.clone(),
            page_sizes: Mutex::new(HashMap::new()),
        });

        let capacity = (self.config.crawler.max_concurrent as usize * 2).max(1);
        let (tx, rx) = mpsc::channel(capacity);

        tracing::info!(
            "Starting crawl at {} (max depth {}, max pages {})",
            seed_url,
            self.config.crawler.max_depth,
            self.config.crawler.max_pages
        );
        let driver = tokio::spawn(drive(context, tx));

        Ok(CrawlHandle {
            stream: CrawlStream {
                inner: ReceiverStream::new(rx),
            },
            cancel,
            driver,
        })
    }
}

/// The results of one crawl, in completion order
///
/// Finite and not restartable. Dropping it stops the crawl.
pub struct CrawlStream {
    inner: ReceiverStream<CrawlResult>,
}

impl Stream for CrawlStream {
    type Item = CrawlResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Control over a running crawl
pub struct CrawlHandle {
    stream: CrawlStream,
    cancel: CancellationToken,
    driver: JoinHandle<Result<CrawlStatistics, TideError>>,
}

impl CrawlHandle {
    /// Waits for the next result; `None` once the crawl is over
    pub async fn next(&mut self) -> Option<CrawlResult> {
        self.stream.next().await
    }

    /// The result stream, for use with stream combinators
    pub fn stream(&mut self) -> &mut CrawlStream {
        &mut self.stream
    }

    /// Stops dispatching new fetches
    ///
    /// Fetches already in flight get the configured grace period to finish and
    /// their results are still delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this crawl, e.g. from a signal handler
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Discards any remaining results and waits for the crawl to end
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlStatistics)` - The crawl ended in an orderly way
    /// * `Err(TideError::CancellationTimeout)` - In-flight fetches outlived the grace period
    pub async fn finish(mut self) -> Result<CrawlStatistics, TideError> {
        while self.stream.next().await.is_some() {}
        self.join().await
    }

    /// Collects every remaining result, then waits for the crawl to end
    pub async fn collect(mut self) -> Result<(Vec<CrawlResult>, CrawlStatistics), TideError> {
        let mut results = Vec::new();
        while let Some(result) = self.stream.next().await {
            results.push(result);
        }
        let stats = self.join().await?;
        Ok((results, stats))
    }

    async fn join(self) -> Result<CrawlStatistics, TideError> {
        match self.driver.await {
            Ok(outcome) => outcome,
            Err(e) => Err(TideError::Driver(e.to_string())),
        }
    }
}

/// State shared by the driver and its fetch tasks for one crawl
struct CrawlContext {
    config: Arc<Config>,
    frontier: Frontier,
    governor: Arc<DomainGovernor>,
    timing: Arc<HumanTiming>,
    profiles: Arc<ProfileRotator>,
    fetcher: Arc<dyn PageFetcher>,
    robots: Option<Arc<RobotsCache>>,
    relevance: Arc<dyn RelevanceFilter>,
    random: Arc<dyn RandomSource>,
    retry: BackoffPolicy,
    cancel: CancellationToken,
    /// Readable size of the last page fetched per domain
    page_sizes: Mutex<HashMap<String, usize>>,
}

impl CrawlContext {
    fn last_page_size(&self, domain: &str) -> Option<usize> {
        match self.page_sizes.lock() {
            Ok(sizes) => sizes.get(domain).copied(),
            Err(poisoned) => poisoned.into_inner().get(domain).copied(),
        }
    }

    fn remember_page_size(&self, domain: &str, size: usize) {
        let mut sizes = match self.page_sizes.lock() {
            Ok(sizes) => sizes,
            Err(poisoned) => poisoned.into_inner(),
        };
        sizes.insert(domain.to_string(), size);
    }
}

/// What a finished fetch task hands back to the driver
struct TaskOutput {
    domain: String,
    result: CrawlResult,
    rate_limited: bool,
}

/// Dispatch loop: runs until the frontier is exhausted or the crawl is cancelled
async fn drive(
    context: Arc<CrawlContext>,
    tx: mpsc::Sender<CrawlResult>,
) -> Result<CrawlStatistics, TideError> {
    let started = Instant::now();
    let per_domain = context.config.crawler.per_domain_concurrency.max(1);
    let permits = Arc::new(Semaphore::new(
        context.config.crawler.max_concurrent.max(1) as usize,
    ));

    let mut stats = CrawlStatistics::default();
    let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
    let mut active: HashMap<String, u32> = HashMap::new();

    loop {
        if context.cancel.is_cancelled() {
            let outcome = drain(&context, &mut tasks, &mut active, &mut stats, &tx).await;
            stats.elapsed = started.elapsed();
            tracing::info!("Crawl cancelled after {} pages", stats.total);
            return outcome.map(|_| stats);
        }

        while let Ok(permit) = Arc::clone(&permits).try_acquire_owned() {
            let next = context.frontier.next_where(|entry| {
                let busy = extract_domain(&entry.url)
                    .and_then(|domain| active.get(&domain).copied())
                    .unwrap_or(0);
                busy < per_domain
            });
            let Some(entry) = next else {
                break;
            };

            let domain = extract_domain(&entry.url).unwrap_or_default();
            *active.entry(domain).or_insert(0) += 1;

            let task_context = Arc::clone(&context);
            tasks.spawn(async move {
                let _permit = permit;
                crawl_isolated(task_context, entry).await
            });
        }

        if tasks.is_empty() {
            break;
        }

        tokio::select! {
            biased;
            _ = context.cancel.cancelled() => {
                tracing::info!("Cancellation requested, {} fetches in flight", tasks.len());
            }
            Some(joined) = tasks.join_next() => match joined {
                Ok(output) => {
                    if !handle_output(&context, &mut active, &mut stats, output, &tx).await {
                        tracing::debug!("Result receiver dropped, stopping crawl");
                        context.cancel.cancel();
                    }
                    if stats.total % 10 == 0 {
                        let rate = stats.total as f64 / started.elapsed().as_secs_f64().max(1e-9);
                        tracing::info!(
                            "Progress: {} pages crawled, {} pending, {:.2} pages/sec",
                            stats.total,
                            context.frontier.pending_count(),
                            rate
                        );
                    }
                }
                Err(e) => tracing::error!("Crawl task failed: {}", e),
            },
        }
    }

    stats.elapsed = started.elapsed();
    tracing::info!(
        "Crawl complete: {} pages in {:.1}s ({} succeeded)",
        stats.total,
        stats.elapsed.as_secs_f64(),
        stats.succeeded
    );
    Ok(stats)
}

/// Lets in-flight tasks finish within the grace period, then aborts the rest
async fn drain(
    context: &CrawlContext,
    tasks: &mut JoinSet<TaskOutput>,
    active: &mut HashMap<String, u32>,
    stats: &mut CrawlStatistics,
    tx: &mpsc::Sender<CrawlResult>,
) -> Result<(), TideError> {
    let grace = context.config.cancel_grace_period();
    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => return Ok(()),
                Some(Ok(output)) => {
                    handle_output(context, active, stats, output, tx).await;
                }
                Some(Err(e)) => tracing::error!("Crawl task failed: {}", e),
            },
            _ = &mut deadline => {
                tracing::error!(
                    "{} fetches still running after {:?} grace period, aborting",
                    tasks.len(),
                    grace
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return Err(TideError::CancellationTimeout { grace });
            }
        }
    }
}

/// Books a finished task and forwards its result
///
/// Returns false if the receiver is gone.
async fn handle_output(
    context: &CrawlContext,
    active: &mut HashMap<String, u32>,
    stats: &mut CrawlStatistics,
    output: TaskOutput,
    tx: &mpsc::Sender<CrawlResult>,
) -> bool {
    let TaskOutput {
        domain,
        mut result,
        rate_limited,
    } = output;

    if let Some(count) = active.get_mut(&domain) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            active.remove(&domain);
        }
    }

    context.frontier.mark_visited(&result.url);
    if result.is_success() {
        result.matched_keywords = context.relevance.matched_keywords(&result);
    }

    let expand = result.is_success()
        && result.depth < context.config.crawler.max_depth
        && !context.cancel.is_cancelled()
        && context.relevance.should_expand(&result);
    if expand {
        let queued = result
            .extracted_links
            .iter()
            .filter(|link| context.frontier.offer(link, result.depth + 1, Some(&result.url)))
            .count();
        tracing::debug!(
            "Queued {} of {} links from {}",
            queued,
            result.extracted_links.len(),
            result.url
        );
    }

    if rate_limited {
        stats.record_rate_limited(&domain);
    }
    stats.record(&result);

    match &result.outcome {
        CrawlOutcome::Success { .. } => tracing::info!("Fetched {}", result.url),
        outcome => tracing::info!("{}: {}", result.url, outcome),
    }

    tx.send(result).await.is_ok()
}

/// Runs [`crawl_entry`] in its own task so that a panic still yields a result
///
/// Dropping this future, as `abort_all` does, aborts the inner task too.
async fn crawl_isolated(context: Arc<CrawlContext>, entry: FrontierEntry) -> TaskOutput {
    let domain = extract_domain(&entry.url).unwrap_or_default();
    let FrontierEntry {
        url,
        depth,
        discovered_from,
    } = entry.clone();

    let mut task = AbortOnDrop(tokio::spawn(async move {
        crawl_entry(&context, entry).await
    }));

    match (&mut task.0).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("Fetch task for {} failed: {}", url, e);
            TaskOutput {
                domain,
                result: CrawlResult::failed(
                    url,
                    depth,
                    discovered_from,
                    FailureKind::Internal,
                    format!("Fetch task failed: {}", e),
                ),
                rate_limited: false,
            }
        }
    }
}

struct AbortOnDrop(JoinHandle<TaskOutput>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Crawls one frontier entry to a result
async fn crawl_entry(context: &CrawlContext, entry: FrontierEntry) -> TaskOutput {
    let FrontierEntry {
        url,
        depth,
        discovered_from,
    } = entry;
    let domain = extract_domain(&url).unwrap_or_default();
    let mut profile = context.profiles.checkout();
    let mut rate_limited = false;

    let output = |result: CrawlResult, rate_limited: bool| TaskOutput {
        domain: domain.clone(),
        result,
        rate_limited,
    };
    let skipped = |reason: SkipReason, rate_limited: bool| {
        output(
            CrawlResult::skipped(url.clone(), depth, discovered_from.clone(), reason),
            rate_limited,
        )
    };

    if let Some(robots) = &context.robots {
        // Downloading robots.txt is a request to the domain like any other
        if !robots.is_cached(&url) && !wait_for_slot(context, &domain, Duration::ZERO).await {
            return skipped(SkipReason::Cancelled, false);
        }
        let verdict = robots
            .check(&url, context.fetcher.as_ref(), &profile)
            .await;
        if let Some(delay) = verdict.crawl_delay {
            context.governor.set_crawl_delay(&domain, delay);
        }
        if !verdict.allowed {
            return skipped(SkipReason::RobotsDisallowed, false);
        }
    }

    let max_attempts = context.config.retry.max_attempts.max(1);
    let mut server_retries = 0;
    let mut rate_limit_retries = 0;
    let mut retry_wait = Duration::ZERO;
    loop {
        if !wait_for_slot(context, &domain, retry_wait).await {
            return skipped(SkipReason::Cancelled, rate_limited);
        }
        retry_wait = Duration::ZERO;

        match context.fetcher.fetch(&url, &profile).await {
            Ok(page) => {
                context.governor.record_success(&domain);
                context.remember_page_size(&domain, page.text_length);

                let result = CrawlResult {
                    url: url.clone(),
                    depth,
                    discovered_from: discovered_from.clone(),
                    outcome: CrawlOutcome::Success {
                        status: page.status,
                    },
                    extracted_links: page.links,
                    content: Some(PageContent {
                        final_url: page.final_url,
                        content_type: page.content_type,
                        title: page.title,
                        body: page.body,
                    }),
                    latency: Some(page.latency),
                    fetched_at: Utc::now(),
                    matched_keywords: Vec::new(),
                };
                return output(result, rate_limited);
            }
            Err(FetchError::RateLimited { retry_after }) => {
                rate_limited = true;
                context.governor.record_rate_limited(&domain, retry_after);
                if context.config.user_agents.rotate_on_rate_limit {
                    profile = context.profiles.rotate();
                }

                if rate_limit_retries >= context.config.retry.rate_limit_retries {
                    let result = CrawlResult::failed(
                        url.clone(),
                        depth,
                        discovered_from.clone(),
                        FailureKind::RateLimit,
                        format!("Still rate limited after {} retries", rate_limit_retries),
                    );
                    return output(result, rate_limited);
                }
                rate_limit_retries += 1;
            }
            Err(FetchError::Http { status }) if (400..500).contains(&status) => {
                return skipped(SkipReason::HttpStatus(status), rate_limited);
            }
            Err(error) if error.is_retryable() && server_retries + 1 < max_attempts => {
                retry_wait = context
                    .retry
                    .delay_for(server_retries, context.random.as_ref());
                server_retries += 1;
                tracing::warn!(
                    "Fetch of {} failed ({}), retry {}/{} in at least {:.1}s",
                    url,
                    error,
                    server_retries,
                    max_attempts - 1,
                    retry_wait.as_secs_f64()
                );
            }
            Err(error) => {
                let result = CrawlResult::failed(
                    url.clone(),
                    depth,
                    discovered_from.clone(),
                    error.failure_kind(),
                    error.to_string(),
                );
                return output(result, rate_limited);
            }
        }
    }
}

/// Reserves a slot with the governor and sleeps until it opens
///
/// The wait is the longest of `at_least`, the governor's spacing and the
/// human-timing adjustment. Returns false if the crawl was cancelled first.
async fn wait_for_slot(context: &CrawlContext, domain: &str, at_least: Duration) -> bool {
    if context.cancel.is_cancelled() {
        return false;
    }

    let previous_page = context.last_page_size(domain);
    let wait = context.governor.acquire_adjusted(domain, |base| {
        context.timing.adjust(base, previous_page).max(at_least)
    });
    if wait.is_zero() {
        return true;
    }

    tracing::debug!("Waiting {:.1}s before contacting {}", wait.as_secs_f64(), domain);
    tokio::select! {
        _ = context.cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::FetchedPage;
    use crate::stealth::{RequestProfile, SeededRandom};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Notify;
    use url::Url;

    const SECOND: Duration = Duration::from_secs(1);

    #[derive(Default)]
    struct ScriptedSite {
        /// URL → (body, links)
        pages: HashMap<String, (String, Vec<String>)>,
        /// URL → number of 429 responses before success
        rate_limits: Mutex<HashMap<String, u32>>,
        /// URL → number of 503 responses before success
        server_errors: Mutex<HashMap<String, u32>>,
        /// URL whose fetch panics
        panics_on: Option<String>,
        /// URL whose fetch never completes on its own
        stalled: Option<String>,
        robots: Option<String>,
        fetches: Mutex<Vec<(String, Instant)>>,
        stall_started: Notify,
    }

    impl ScriptedSite {
        fn page(mut self, url: &str, links: &[&str]) -> Self {
            self.pages.insert(
                url.to_string(),
                (
                    "<p>plain page</p>".to_string(),
                    links.iter().map(|l| l.to_string()).collect(),
                ),
            );
            self
        }

        fn page_with_body(mut self, url: &str, body: &str, links: &[&str]) -> Self {
            self.pages.insert(
                url.to_string(),
                (
                    body.to_string(),
                    links.iter().map(|l| l.to_string()).collect(),
                ),
            );
            self
        }

        fn fetch_times(&self) -> Vec<(String, Instant)> {
            self.fetches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedSite {
        async fn fetch(
            &self,
            url: &Url,
            _profile: &RequestProfile,
        ) -> Result<FetchedPage, FetchError> {
            self.fetches
                .lock()
                .unwrap()
                .push((url.to_string(), Instant::now()));

            if self.panics_on.as_deref() == Some(url.as_str()) {
                panic!("scripted fetcher failure for {}", url);
            }

            if let Some(remaining) = self.server_errors.lock().unwrap().get_mut(url.as_str()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Http { status: 503 });
                }
            }

            if self.stalled.as_deref() == Some(url.as_str()) {
                self.stall_started.notify_one();
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }

            if let Some(remaining) = self.rate_limits.lock().unwrap().get_mut(url.as_str()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::RateLimited { retry_after: None });
                }
            }

            let (body, links) = self
                .pages
                .get(url.as_str())
                .ok_or(FetchError::Http { status: 404 })?;

            Ok(FetchedPage {
                final_url: url.clone(),
                status: 200,
                content_type: "text/html".to_string(),
                title: None,
                links: links.clone(),
                body: body.clone(),
                text_length: body.len(),
                latency: Duration::from_millis(50),
            })
        }

        async fn fetch_text(&self, _url: &Url, _profile: &RequestProfile) -> Option<String> {
            self.robots.clone()
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.crawler.default_delay = 0.0;
        config.crawler.max_depth = 1;
        config.crawler.max_pages = 50;
        config.human.enabled = false;
        config.backoff.initial_delay = 1.0;
        config.backoff.max_delay = 10.0;
        config
    }

    fn coordinator(config: Config, site: Arc<ScriptedSite>) -> Coordinator {
        Coordinator::builder(config)
            .random(Arc::new(SeededRandom::new(7)))
            .fetcher(site)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_domain_fetches_are_spaced_by_floor() {
        let mut config = test_config();
        config
            .rate_limits
            .insert("basketball-reference.com".to_string(), 10.0);
        config.crawler.per_domain_concurrency = 3;

        let site = Arc::new(
            ScriptedSite::default()
                .page(
                    "https://www.basketball-reference.com/",
                    &[
                        "https://www.basketball-reference.com/a",
                        "https://www.basketball-reference.com/b",
                    ],
                )
                .page("https://www.basketball-reference.com/a", &[])
                .page("https://www.basketball-reference.com/b", &[]),
        );

        let handle = coordinator(config, Arc::clone(&site))
            .run("https://www.basketball-reference.com/")
            .unwrap();
        let (results, stats) = handle.collect().await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(stats.succeeded, 3);

        let mut times: Vec<Instant> = site.fetch_times().into_iter().map(|(_, t)| t).collect();
        times.sort();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= SECOND * 10);
        }
        assert!(times[2] - times[0] >= SECOND * 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_and_depth_respected() {
        let mut config = test_config();
        config.crawler.max_pages = 5;

        let links: Vec<String> = (0..20).map(|i| format!("https://example.com/p{}", i)).collect();
        let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
        let mut site = ScriptedSite::default().page("https://example.com/", &link_refs);
        for link in &links {
            site = site.page(link, &["https://example.com/deeper"]);
        }
        let site = Arc::new(site);

        let (results, stats) = coordinator(config, Arc::clone(&site))
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(stats.total, 5);
        assert!(results.iter().all(|r| r.depth <= 1));
        assert_eq!(results.iter().filter(|r| r.depth == 0).count(), 1);

        let unique: HashSet<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(unique.len(), 5);
        assert!(!unique.contains("https://example.com/deeper"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_page_retried_after_backoff() {
        let config = test_config();
        let site = ScriptedSite::default().page("https://example.com/", &[]);
        site.rate_limits
            .lock()
            .unwrap()
            .insert("https://example.com/".to_string(), 2);
        let site = Arc::new(site);

        let coordinator = coordinator(config, Arc::clone(&site));
        let (results, stats) = coordinator
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
        assert!(stats.rate_limited_domains.contains("example.com"));

        let times = site.fetch_times();
        assert_eq!(times.len(), 3);
        // First backoff is at least the initial delay, the second longer still
        let first_gap = times[1].1 - times[0].1;
        let second_gap = times[2].1 - times[1].1;
        assert!(first_gap >= SECOND);
        assert!(second_gap > first_gap);

        let state = coordinator.governor().snapshot("example.com").unwrap();
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_exhausted() {
        let mut config = test_config();
        config.retry.rate_limit_retries = 1;
        let site = ScriptedSite::default().page("https://example.com/", &[]);
        site.rate_limits
            .lock()
            .unwrap()
            .insert("https://example.com/".to_string(), 10);
        let site = Arc::new(site);

        let (results, stats) = coordinator(config, Arc::clone(&site))
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert!(matches!(
            results[0].outcome,
            CrawlOutcome::Failed {
                kind: FailureKind::RateLimit,
                ..
            }
        ));
        assert_eq!(site.fetch_times().len(), 2);
        assert_eq!(stats.failures_by_kind.get(&FailureKind::RateLimit), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_skipped() {
        let config = test_config();
        let site = Arc::new(
            ScriptedSite::default().page("https://example.com/", &["https://example.com/missing"]),
        );

        let (results, _) = coordinator(config, site)
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        let missing = results
            .iter()
            .find(|r| r.url.path() == "/missing")
            .unwrap();
        assert_eq!(
            missing.outcome,
            CrawlOutcome::Skipped {
                reason: SkipReason::HttpStatus(404)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_robots_disallowed_not_fetched() {
        let config = test_config();
        let mut site = ScriptedSite::default()
            .page(
                "https://example.com/",
                &["https://example.com/private/data", "https://example.com/open"],
            )
            .page("https://example.com/open", &[])
            .page("https://example.com/private/data", &[]);
        site.robots = Some("User-agent: *\nDisallow: /private\nCrawl-delay: 2".to_string());
        let site = Arc::new(site);

        let coordinator = coordinator(config, Arc::clone(&site));
        let (results, _) = coordinator
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        let private = results
            .iter()
            .find(|r| r.url.path() == "/private/data")
            .unwrap();
        assert_eq!(
            private.outcome,
            CrawlOutcome::Skipped {
                reason: SkipReason::RobotsDisallowed
            }
        );
        assert!(site
            .fetch_times()
            .iter()
            .all(|(url, _)| !url.contains("/private")));
        assert_eq!(
            coordinator.governor().snapshot("example.com").unwrap().floor(),
            SECOND * 2
        );
        assert_eq!(coordinator.robots().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keyword_filter_limits_expansion() {
        let mut config = test_config();
        config.crawler.keywords = vec!["Box Score".to_string()];
        let site = Arc::new(
            ScriptedSite::default()
                .page_with_body(
                    "https://example.com/",
                    "<p>season schedule</p>",
                    &["https://example.com/game"],
                )
                .page("https://example.com/game", &[]),
        );

        let (results, _) = coordinator(config, site)
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closure_relevance_filter() {
        let config = test_config();
        let site = Arc::new(
            ScriptedSite::default()
                .page("https://example.com/", &["https://example.com/game"])
                .page("https://example.com/game", &[]),
        );

        let coordinator = Coordinator::builder(config)
            .random(Arc::new(SeededRandom::new(7)))
            .fetcher(site)
            .relevance_filter(Arc::new(|result: &CrawlResult| result.url.path() == "/"))
            .build()
            .unwrap();
        let (results, _) = coordinator
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_links_need_opt_in() {
        let mut config = test_config();
        let site = Arc::new(
            ScriptedSite::default()
                .page("https://example.com/", &["https://other.org/"])
                .page("https://other.org/", &[]),
        );

        let (results, _) = coordinator(config.clone(), Arc::clone(&site))
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(results.len(), 1);

        config.crawler.follow_external_links = true;
        let (results, _) = coordinator(config, site)
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_dispatch() {
        let mut config = test_config();
        config.crawler.default_delay = 5.0;

        let links: Vec<String> = (0..10).map(|i| format!("https://example.com/p{}", i)).collect();
        let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
        let mut site = ScriptedSite::default().page("https://example.com/", &link_refs);
        for link in &links {
            site = site.page(link, &[]);
        }
        let site = Arc::new(site);

        let mut handle = coordinator(config, Arc::clone(&site))
            .run("https://example.com/")
            .unwrap();
        let first = handle.next().await.unwrap();
        assert!(first.is_success());
        assert_eq!(first.url.as_str(), "https://example.com/");

        handle.cancel();
        let (rest, stats) = handle.collect().await.unwrap();

        // Only the seed went out; anything dispatched while it waited for
        // its slot comes back unfetched
        assert_eq!(site.fetch_times().len(), 1);
        assert!(rest.len() <= 1);
        for result in &rest {
            assert_eq!(
                result.outcome,
                CrawlOutcome::Skipped {
                    reason: SkipReason::Cancelled
                }
            );
        }
        assert_eq!(stats.total, 1 + rest.len() as u64);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.skipped, rest.len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retries_keep_domain_spacing() {
        let mut config = test_config();
        config.crawler.default_delay = 2.0;
        config.crawler.respect_robots = false;
        config.retry.max_attempts = 3;
        config.retry.base_delay = 0.05;
        config.retry.jitter = 0.0;

        let site = ScriptedSite::default().page("https://example.com/", &[]);
        site.server_errors
            .lock()
            .unwrap()
            .insert("https://example.com/".to_string(), 2);
        let site = Arc::new(site);

        let (results, _) = coordinator(config, Arc::clone(&site))
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());

        let times = site.fetch_times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= SECOND * 2);
        }
        assert!(times[2].1 - times[0].1 >= SECOND * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retries_back_off_and_give_up() {
        let mut config = test_config();
        config.crawler.respect_robots = false;
        config.retry.max_attempts = 3;
        config.retry.base_delay = 3.0;
        config.retry.multiplier = 2.0;
        config.retry.jitter = 0.0;

        let site = ScriptedSite::default().page("https://example.com/", &[]);
        site.server_errors
            .lock()
            .unwrap()
            .insert("https://example.com/".to_string(), 10);
        let site = Arc::new(site);

        let (results, stats) = coordinator(config, Arc::clone(&site))
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert!(matches!(
            results[0].outcome,
            CrawlOutcome::Failed {
                kind: FailureKind::Http,
                ..
            }
        ));
        assert_eq!(stats.failures_by_kind.get(&FailureKind::Http), Some(&1));

        let times = site.fetch_times();
        assert_eq!(times.len(), 3);
        assert!(times[1].1 - times[0].1 >= SECOND * 3);
        assert!(times[2].1 - times[1].1 >= SECOND * 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_robots_download_takes_a_slot() {
        let mut config = test_config();
        config.crawler.default_delay = 3.0;
        let site = Arc::new(ScriptedSite::default().page("https://example.com/", &[]));

        let started = Instant::now();
        let (results, _) = coordinator(config, Arc::clone(&site))
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert!(results[0].is_success());
        let times = site.fetch_times();
        assert_eq!(times.len(), 1);
        assert!(times[0].1 - started >= SECOND * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_fetch_fails_one_page_only() {
        let config = test_config();
        let mut site = ScriptedSite::default()
            .page(
                "https://example.com/",
                &["https://example.com/a", "https://example.com/b"],
            )
            .page("https://example.com/a", &[])
            .page("https://example.com/b", &[]);
        site.panics_on = Some("https://example.com/a".to_string());
        let site = Arc::new(site);

        let (results, stats) = coordinator(config, Arc::clone(&site))
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let a = results.iter().find(|r| r.url.path() == "/a").unwrap();
        assert!(matches!(
            a.outcome,
            CrawlOutcome::Failed {
                kind: FailureKind::Internal,
                ..
            }
        ));
        let b = results.iter().find(|r| r.url.path() == "/b").unwrap();
        assert!(b.is_success());
        assert_eq!(stats.failures_by_kind.get(&FailureKind::Internal), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_matched_keywords_recorded() {
        let mut config = test_config();
        config.crawler.keywords = vec!["Box Score".to_string(), "Roster".to_string()];
        let site = Arc::new(
            ScriptedSite::default()
                .page_with_body(
                    "https://example.com/",
                    "<p>Tonight's box score</p>",
                    &["https://example.com/game"],
                )
                .page("https://example.com/game", &[]),
        );

        let (results, stats) = coordinator(config, site)
            .run("https://example.com/")
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let seed = results.iter().find(|r| r.depth == 0).unwrap();
        assert_eq!(seed.matched_keywords, vec!["Box Score".to_string()]);
        let game = results.iter().find(|r| r.depth == 1).unwrap();
        assert!(game.matched_keywords.is_empty());
        assert_eq!(stats.keyword_matches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_timeout_is_fatal() {
        let mut config = test_config();
        config.crawler.cancel_grace_period = 1.0;

        let mut site = ScriptedSite::default()
            .page("https://example.com/", &["https://example.com/slow"])
            .page("https://example.com/slow", &[]);
        site.stalled = Some("https://example.com/slow".to_string());
        let site = Arc::new(site);

        let mut handle = coordinator(config, Arc::clone(&site))
            .run("https://example.com/")
            .unwrap();
        assert!(handle.next().await.unwrap().is_success());

        site.stall_started.notified().await;
        handle.cancel();

        let outcome = handle.finish().await;
        assert!(matches!(
            outcome,
            Err(TideError::CancellationTimeout { grace }) if grace == SECOND
        ));
    }

    #[tokio::test]
    async fn test_invalid_seed_is_fatal() {
        let site = Arc::new(ScriptedSite::default());
        let coordinator = coordinator(test_config(), site);

        for seed in ["not a url", "ftp://example.com/", "https://doubleclick.net/"] {
            assert!(matches!(
                coordinator.run(seed),
                Err(TideError::InvalidSeed { .. })
            ));
        }
    }

    #[test]
    fn test_keyword_filter_matches_content() {
        let filter = KeywordFilter::new(&["Box Score", " "]);
        let mut result = CrawlResult::without_content(
            Url::parse("https://example.com/x").unwrap(),
            0,
            None,
            CrawlOutcome::Success { status: 200 },
        );
        assert!(!filter.should_expand(&result));

        result.content = Some(PageContent {
            final_url: result.url.clone(),
            content_type: "text/html".to_string(),
            title: Some("Lakers BOX SCORE".to_string()),
            body: String::new(),
        });
        assert!(filter.should_expand(&result));
        assert_eq!(filter.matched_keywords(&result), vec!["Box Score".to_string()]);
        assert!(KeywordFilter::new::<&str>(&[]).should_expand(&result));
        assert!(AcceptAll.matched_keywords(&result).is_empty());
    }
}
