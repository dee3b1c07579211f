//! End-to-end crawl scenarios.
//!
//! Each test exercises the public crate surface the way a caller would:
//! build `CrawlerOptions`, run a `CrawlEngine` (or, for scenarios that
//! target a single collaborator directly, that collaborator alone)
//! against a `mockito` server, and inspect the resulting filesystem state.

use std::time::Duration;

use docscrawl::{
    AddOutcome, CrawlEngine, CrawlerOptions, Fetcher, FetcherConfig, ItemMetadata, Priority,
    WorkQueue,
};

fn fast_fetcher_config() -> FetcherConfig {
    FetcherConfig {
        max_connections: 20,
        max_per_host: 10,
        rate_limit_rps: 1000.0,
        rate_limit_burst: 100,
        max_retries: 3,
        retry_delay_seconds: 0.01,
        request_timeout_secs: 5,
    }
}

/// Scenario A — trivial crawl: one page, one stylesheet reference, no
/// outgoing links.
#[tokio::test]
async fn scenario_a_trivial_crawl() {
    let mut server = mockito::Server::new_async().await;
    let page = r#"
        <html><head><title>Home</title></head>
        <body>
            <link rel="stylesheet" href="./s.css">
            <article class="doc"><h1>Home</h1><p>Welcome.</p></article>
        </body></html>
    "#;
    let page_mock = server
        .mock("GET", "/docs/")
        .with_status(200)
        .with_body(page)
        .create_async()
        .await;
    let css_mock = server
        .mock("GET", "/docs/s.css")
        .with_status(200)
        .with_body(vec![b'a'; 100])
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let options = CrawlerOptions::builder()
        .seed_url(format!("{}/docs/", server.url()))
        .project("example".to_string())
        .output_dir(dir.path().to_path_buf())
        .max_workers(2)
        .rate_limit_rps(1000.0)
        .rate_limit_burst(100)
        .build();

    let engine = CrawlEngine::new(options, "scenario-a".to_string()).unwrap();
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.total_routes, 1);

    let routes_json = tokio::fs::read_to_string(dir.path().join("routes.json"))
        .await
        .unwrap();
    let routes: serde_json::Value = serde_json::from_str(&routes_json).unwrap();
    let entry = &routes["/example/reference"];
    assert_eq!(entry["title"], "Home");

    let css_path = dir.path().join("static/css/s.css");
    let css_bytes = tokio::fs::read(&css_path).await.unwrap();
    assert_eq!(css_bytes.len(), 100);

    assert!(tokio::fs::try_exists(dir.path().join("templates/reference.html"))
        .await
        .unwrap());
    assert!(!tokio::fs::try_exists(dir.path().join(".scraper_checkpoint.json"))
        .await
        .unwrap());

    page_mock.assert_async().await;
    css_mock.assert_async().await;
}

/// Scenario B — dedup: the seed page links to itself twice (once with a
/// `#section` fragment) and to `/b`; the self-links must collapse to the
/// already-visited seed rather than re-enqueueing it.
#[tokio::test]
async fn scenario_b_dedup_via_normalization_and_visited_set() {
    let mut server = mockito::Server::new_async().await;
    let seed_page = format!(
        r#"
        <html><head><title>A</title></head>
        <body>
            <nav><ul>
                <li><a href="{base}/#section">Self again</a></li>
                <li><a href="{base}/">Self</a></li>
                <li><a href="{base}/b">B</a></li>
            </ul></nav>
            <article class="doc"><h1>A</h1></article>
        </body></html>
    "#,
        base = server.url()
    );
    let page_b = r#"
        <html><head><title>B</title></head>
        <body><article class="doc"><h1>B</h1></article></body></html>
    "#;

    let mock_seed = server
        .mock("GET", "/")
        .with_status(200)
        .with_body(&seed_page)
        .expect(1)
        .create_async()
        .await;
    let mock_b = server
        .mock("GET", "/b")
        .with_status(200)
        .with_body(page_b)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let options = CrawlerOptions::builder()
        .seed_url(format!("{}/", server.url()))
        .project("example".to_string())
        .output_dir(dir.path().to_path_buf())
        .max_workers(2)
        .rate_limit_rps(1000.0)
        .rate_limit_burst(100)
        .build();

    let engine = CrawlEngine::new(options, "scenario-b".to_string()).unwrap();
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.total_routes, 2);
    assert_eq!(summary.total_failed, 0);

    mock_seed.assert_async().await;
    mock_b.assert_async().await;
}

/// Scenario C — dynamic pattern collapse: a list page links to
/// `/posts/1` through `/posts/500`; only the first of that family is ever
/// fetched.
#[tokio::test]
async fn scenario_c_pattern_collapse_limits_queue_growth() {
    let queue = WorkQueue::new(10_000, 3);
    for i in 1..=500 {
        queue
            .add(
                &format!("https://example.com/posts/{i}"),
                Priority::Normal,
                ItemMetadata::default(),
            )
            .await;
    }
    let outcome = queue
        .add(
            "https://example.com/posts/501",
            Priority::Normal,
            ItemMetadata::default(),
        )
        .await;

    assert_eq!(outcome, AddOutcome::DroppedPatternCollapse);
    assert_eq!(queue.pending_len(), 1);
}

/// Scenario D — retry+fail: a URL returns 500 three times in a row, run
/// through the full engine rather than the fetcher alone. The fetcher's own
/// backoff loop owns the retry budget here; the queue must mark the item
/// permanently failed on the first report instead of requeuing it for a
/// second round of retries (which would call the mock more than 3 times
/// and fail `mock.assert_async()`).
#[tokio::test]
async fn scenario_d_exhausted_retries_report_http_status() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/flaky")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let options = CrawlerOptions::builder()
        .seed_url(format!("{}/flaky", server.url()))
        .project("example".to_string())
        .output_dir(dir.path().to_path_buf())
        .max_workers(1)
        .max_retries(3)
        .retry_delay_seconds(0.01)
        .rate_limit_rps(1000.0)
        .rate_limit_burst(100)
        .build();

    let engine = CrawlEngine::new(options, "scenario-d".to_string()).unwrap();
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.total_routes, 0);
    assert_eq!(summary.total_failed, 1);

    let failed = engine.failed_urls();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].1.contains("500"));

    mock.assert_async().await;
}

/// Scenario E — 429: a URL returns 429 with `Retry-After: 1`, then 200.
/// The wait is honored and the eventual success is returned without
/// consuming the ordinary retry budget.
#[tokio::test]
async fn scenario_e_429_retry_after_then_success() {
    let mut server = mockito::Server::new_async().await;
    let rate_limited = server
        .mock("GET", "/limited")
        .with_status(429)
        .with_header("Retry-After", "1")
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/limited")
        .with_status(200)
        .with_body("ok")
        .expect(1)
        .create_async()
        .await;

    let fetcher = Fetcher::new(fast_fetcher_config()).unwrap();
    let url = format!("{}/limited", server.url());

    let started = tokio::time::Instant::now();
    let resp = fetcher
        .fetch(&url, reqwest::Method::GET, None)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(resp.body, b"ok");
    assert!(elapsed >= Duration::from_millis(900), "should have waited ~1s for Retry-After");

    rate_limited.assert_async().await;
    ok.assert_async().await;
}

/// Scenario F — resume: a URL already marked done in a checkpoint is not
/// re-fetched after restore; a still-pending URL keeps its priority.
#[tokio::test]
async fn scenario_f_resume_skips_done_urls_and_keeps_pending_priority() {
    use docscrawl::QueueItem;

    let queue = WorkQueue::new(1000, 3);
    queue.mark_visited_from_checkpoint("https://example.com/already-done", true, None);

    let outcome = queue
        .add(
            "https://example.com/already-done",
            Priority::Normal,
            ItemMetadata::default(),
        )
        .await;
    assert_eq!(outcome, AddOutcome::AlreadyVisited);

    let pending = QueueItem::new(
        "https://example.com/still-pending".to_string(),
        Priority::High,
        ItemMetadata::default(),
        42,
    );
    queue.restore_pending(vec![pending]).await;

    let popped = queue
        .pop(Duration::from_millis(50))
        .await
        .expect("restored item should be poppable");
    assert_eq!(popped.url, "https://example.com/still-pending");
    assert_eq!(popped.priority, Priority::High);
}
