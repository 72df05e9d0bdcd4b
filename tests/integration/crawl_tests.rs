//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! crawl cycle end-to-end over real HTTP.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use sumi_tide::config::Config;
use sumi_tide::crawler::{crawl, Coordinator, CrawlOutcome, FailureKind, SkipReason};
use sumi_tide::TideError;
use wiremock::matchers::{header_exists, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A configuration fast enough for tests: no pacing, no human delays
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.crawler.default_delay = 0.0;
    config.crawler.respect_robots = false;
    config.crawler.request_timeout = 5;
    config.crawler.max_depth = 1;
    config.crawler.max_pages = 20;
    config.human.enabled = false;
    config.retry.max_attempts = 1;
    config.backoff.initial_delay = 0.05;
    config.backoff.max_delay = 1.0;
    config.backoff.multiplier = 2.0;
    config.backoff.jitter = 0.0;
    config
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><head><title>Test</title></head><body>{}</body></html>", body),
        "text/html",
    )
}

async fn mount_page(server: &MockServer, page_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(html(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        &format!(
            r#"<a href="{0}/page1">Page 1</a>
               <a href="/page2">Page 2</a>
               <a href="/page1#section">Page 1 again</a>
               <a href="/page3">Page 3</a>"#,
            base_url
        ),
    )
    .await;
    mount_page(&mock_server, "/page1", r#"<a href="/deep">Too deep</a>"#).await;
    mount_page(&mock_server, "/page2", "<p>Second page</p>").await;
    mount_page(&mock_server, "/page3", "<p>Third page</p>").await;
    mount_page(&mock_server, "/deep", "<p>Never reached</p>").await;

    let handle = crawl(&format!("{}/", base_url), create_test_config()).unwrap();
    let (results, stats) = handle.collect().await.unwrap();

    let paths: Vec<&str> = results.iter().map(|r| r.url.path()).collect();
    let unique: HashSet<&str> = paths.iter().copied().collect();
    assert_eq!(paths.len(), unique.len(), "duplicate results: {:?}", paths);
    assert_eq!(
        unique,
        ["/", "/page1", "/page2", "/page3"].into_iter().collect()
    );

    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(stats.succeeded, 4);

    let seed = results.iter().find(|r| r.url.path() == "/").unwrap();
    assert_eq!(seed.depth, 0);
    assert_eq!(seed.title(), Some("Test"));

    let page2 = results.iter().find(|r| r.url.path() == "/page2").unwrap();
    assert_eq!(page2.depth, 1);
    assert_eq!(page2.discovered_from.as_ref(), Some(&seed.url));
    assert!(page2.latency.is_some());
}

#[tokio::test]
async fn test_page_budget_is_hard_limit() {
    let mock_server = MockServer::start().await;

    let links: String = (0..10)
        .map(|i| format!(r#"<a href="/p{}">p{}</a>"#, i, i))
        .collect();
    mount_page(&mock_server, "/", &links).await;
    for i in 0..10 {
        mount_page(&mock_server, &format!("/p{}", i), "<p>leaf</p>").await;
    }

    let mut config = create_test_config();
    config.crawler.max_pages = 5;

    let (results, stats) = crawl(&format!("{}/", mock_server.uri()), config)
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(stats.total, 5);
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 5);
}

#[tokio::test]
async fn test_filtered_links_are_not_fetched() {
    let mock_server = MockServer::start().await;

    mount_page(
        &mock_server,
        "/",
        r#"<a href="/report.pdf">PDF</a>
           <a href="/login">Log in</a>
           <a href="https://doubleclick.net/ad">Ad</a>
           <a href="mailto:team@example.com">Mail</a>
           <a href="/article">Article</a>"#,
    )
    .await;
    mount_page(&mock_server, "/article", "<p>Article</p>").await;

    let mut config = create_test_config();
    config.crawler.follow_external_links = true;

    let (results, _) = crawl(&format!("{}/", mock_server.uri()), config)
        .unwrap()
        .collect()
        .await
        .unwrap();

    let paths: HashSet<&str> = results.iter().map(|r| r.url.path()).collect();
    assert_eq!(paths, ["/", "/article"].into_iter().collect());

    let requested: Vec<String> = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!requested.iter().any(|p| p == "/report.pdf" || p == "/login"));
}

#[tokio::test]
async fn test_not_found_is_skipped() {
    let mock_server = MockServer::start().await;

    mount_page(&mock_server, "/", r#"<a href="/missing">Gone</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let (results, stats) = crawl(&format!("{}/", mock_server.uri()), create_test_config())
        .unwrap()
        .collect()
        .await
        .unwrap();

    let missing = results.iter().find(|r| r.url.path() == "/missing").unwrap();
    assert_eq!(
        missing.outcome,
        CrawlOutcome::Skipped {
            reason: SkipReason::HttpStatus(404)
        }
    );
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_non_html_is_parse_failure() {
    let mock_server = MockServer::start().await;

    mount_page(&mock_server, "/", r#"<a href="/data">Data</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&mock_server)
        .await;

    let (results, _) = crawl(&format!("{}/", mock_server.uri()), create_test_config())
        .unwrap()
        .collect()
        .await
        .unwrap();

    let data = results.iter().find(|r| r.url.path() == "/data").unwrap();
    assert!(matches!(
        data.outcome,
        CrawlOutcome::Failed {
            kind: FailureKind::Parse,
            ..
        }
    ));
}

#[tokio::test]
async fn test_rate_limited_then_success() {
    let mock_server = MockServer::start().await;

    // Mounted first, so it answers the first request only
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_page(&mock_server, "/", "<p>Welcome back</p>").await;

    let coordinator = Coordinator::new(create_test_config()).unwrap();
    let (results, stats) = coordinator
        .run(&format!("{}/", mock_server.uri()))
        .unwrap()
        .collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert!(stats.rate_limited_domains.contains("127.0.0.1"));

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let state = coordinator.governor().snapshot("127.0.0.1").unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.backoff_until.is_some());
}

#[tokio::test]
async fn test_persistent_rate_limit_fails_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config();
    config.retry.rate_limit_retries = 2;

    let (results, stats) = crawl(&format!("{}/", mock_server.uri()), config)
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
    assert_eq!(stats.failures_by_kind.get(&FailureKind::RateLimit), Some(&1));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_server_errors_retried_at_domain_pace() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    mount_page(&mock_server, "/", "<p>Recovered</p>").await;

    let mut config = create_test_config();
    config.crawler.default_delay = 2.0;
    config.retry.max_attempts = 3;
    config.retry.base_delay = 0.05;
    config.retry.max_delay = 1.0;
    config.retry.jitter = 0.0;

    let started = Instant::now();
    let (results, _) = crawl(&format!("{}/", mock_server.uri()), config)
        .unwrap()
        .collect()
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
    assert!(
        elapsed >= Duration::from_secs(4),
        "three requests in {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_robots_txt_disallow() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
        )
        .mount(&mock_server)
        .await;
    mount_page(
        &mock_server,
        "/",
        r#"<a href="/private/page">Private</a><a href="/public">Public</a>"#,
    )
    .await;
    mount_page(&mock_server, "/public", "<p>Public</p>").await;
    mount_page(&mock_server, "/private/page", "<p>Private</p>").await;

    let mut config = create_test_config();
    config.crawler.respect_robots = true;

    let (results, _) = crawl(&format!("{}/", mock_server.uri()), config)
        .unwrap()
        .collect()
        .await
        .unwrap();

    let private = results
        .iter()
        .find(|r| r.url.path() == "/private/page")
        .unwrap();
    assert_eq!(
        private.outcome,
        CrawlOutcome::Skipped {
            reason: SkipReason::RobotsDisallowed
        }
    );

    let requested: Vec<String> = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(requested.iter().any(|p| p == "/public"));
    assert!(!requested.iter().any(|p| p == "/private/page"));
    assert_eq!(requested.iter().filter(|p| *p == "/robots.txt").count(), 1);
}

#[tokio::test]
async fn test_requests_carry_browser_profile() {
    let mock_server = MockServer::start().await;

    // Requests without the profile headers fall through to a 404
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header_regex("user-agent", r"^Mozilla/5\.0 "))
        .and(header_exists("accept-language"))
        .respond_with(html("<p>Hello</p>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (results, _) = crawl(&format!("{}/", mock_server.uri()), create_test_config())
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success(), "outcome: {}", results[0].outcome);
}

#[tokio::test]
async fn test_cancel_after_first_result() {
    let mock_server = MockServer::start().await;

    let links: String = (0..10)
        .map(|i| format!(r#"<a href="/p{}">p{}</a>"#, i, i))
        .collect();
    mount_page(&mock_server, "/", &links).await;
    for i in 0..10 {
        mount_page(&mock_server, &format!("/p{}", i), "<p>leaf</p>").await;
    }

    let mut config = create_test_config();
    config.crawler.default_delay = 0.5;

    let mut handle = crawl(&format!("{}/", mock_server.uri()), config).unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), handle.next())
        .await
        .unwrap()
        .unwrap();
    assert!(first.is_success());

    handle.cancel();
    let stats = handle.finish().await.unwrap();
    assert!(stats.total < 11);
}

#[tokio::test]
async fn test_invalid_seed() {
    let result = crawl("not-a-url", create_test_config());
    assert!(matches!(result, Err(TideError::InvalidSeed { .. })));

    let result = crawl("https://doubleclick.net/", create_test_config());
    assert!(matches!(result, Err(TideError::InvalidSeed { .. })));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut config = create_test_config();
    config.crawler.max_concurrent = 0;

    assert!(matches!(
        Coordinator::new(config),
        Err(TideError::Config(_))
    ));
}
