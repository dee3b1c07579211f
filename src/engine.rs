//! Crawl engine: phase orchestration and graceful shutdown.
//!
//! Grounded on `crawl_engine::orchestrator::crawl_pages` for the phase/loop
//! structure, generalized from a browser-driven BFS queue to a priority
//! work queue, and from `crawl_events::bus::core`'s `Notify`-based bus
//! shutdown to a `tokio::signal`-driven double-signal shutdown.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::checkpoint;
use crate::collaborators::{EmptyFrameworkRegistry, FrameworkRegistry, TopicPlanner};
use crate::config::CrawlerOptions;
use crate::fetcher::{Fetcher, FetcherConfig};
use crate::page_processor::PageProcessor;
use crate::progress::{ProgressBus, ProgressEvent, Stage};
use crate::queue::WorkQueue;
use crate::resources::ResourceDownloader;
use crate::types::{DocKind, ItemMetadata, Priority};
use crate::worker_pool::WorkerPool;

/// Summary emitted into `summary.txt` and folded into `metadata.json` at
/// finalization.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub total_routes: usize,
    pub total_static_resources: usize,
    pub total_failed: usize,
    pub duration_secs: f64,
}

pub struct CrawlEngine {
    options: CrawlerOptions,
    job_id: String,
    queue: Arc<WorkQueue>,
    fetcher: Arc<Fetcher>,
    resources: Arc<ResourceDownloader>,
    progress: Arc<ProgressBus>,
    processor: Arc<PageProcessor>,
    running: Arc<std::sync::atomic::AtomicBool>,
    framework_registry: Box<dyn FrameworkRegistry>,
    topic_planner: Option<Box<dyn TopicPlanner>>,
}

impl CrawlEngine {
    /// Builds an engine that crawls `options.seed_url` directly, with no
    /// framework lookup or AI-assisted topic planning.
    pub fn new(options: CrawlerOptions, job_id: String) -> anyhow::Result<Self> {
        Self::with_collaborators(options, job_id, Box::new(EmptyFrameworkRegistry), None)
    }

    /// Builds an engine with an injected `FrameworkRegistry` (used to
    /// resolve `options.framework_id` into a seed URL when `seed_url` is
    /// left empty) and an optional `TopicPlanner` (used in place of plain
    /// nav-link discovery to seed the queue from a planned topic tree).
    pub fn with_collaborators(
        mut options: CrawlerOptions,
        job_id: String,
        framework_registry: Box<dyn FrameworkRegistry>,
        topic_planner: Option<Box<dyn TopicPlanner>>,
    ) -> anyhow::Result<Self> {
        if options.seed_url.is_empty() {
            options.seed_url = framework_registry
                .resolve(&options.framework_id)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "no seed_url configured and framework_registry could not resolve '{}'",
                        options.framework_id
                    )
                })?;
        }

        let queue = Arc::new(WorkQueue::new(options.queue_capacity, options.max_retries));

        let fetcher = Arc::new(Fetcher::new(FetcherConfig {
            max_connections: options.max_connections,
            max_per_host: options.max_per_host,
            rate_limit_rps: options.rate_limit_rps,
            rate_limit_burst: options.rate_limit_burst,
            max_retries: options.max_retries,
            retry_delay_seconds: options.retry_delay_seconds,
            request_timeout_secs: options.request_timeout_secs,
        })?);

        let resources = Arc::new(ResourceDownloader::new(fetcher.clone(), options.output_dir.clone()));
        let progress = Arc::new(ProgressBus::new());

        let processor = Arc::new(PageProcessor {
            fetcher: fetcher.clone(),
            queue: queue.clone(),
            resources: resources.clone(),
            progress: progress.clone(),
            job_id: job_id.clone(),
            output_dir: options.output_dir.clone(),
            seed_url: options.seed_url.clone(),
            templates: DashMap::new(),
            templates_lock: AsyncMutex::new(()),
            routes: DashMap::new(),
            content_written: std::sync::atomic::AtomicU64::new(0),
            resource_tasks: AsyncMutex::new(tokio::task::JoinSet::new()),
        });

        Ok(Self {
            options,
            job_id,
            queue,
            fetcher,
            resources,
            progress,
            processor,
            running: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            framework_registry,
            topic_planner,
        })
    }

    #[must_use]
    pub fn progress_bus(&self) -> Arc<ProgressBus> {
        self.progress.clone()
    }

    /// Runs all four phases to completion (or until shutdown). Returns a
    /// summary on success.
    pub async fn run(&self) -> anyhow::Result<CrawlSummary> {
        let start = std::time::Instant::now();
        self.emit(Stage::Init, "preparing directory tree", 0);

        // Phase 1: Prepare.
        self.options.ensure_directory_tree().await?;
        let resumed = self.restore_checkpoint_if_present().await?;

        // Phase 2: Seed.
        if !resumed {
            self.emit(Stage::UrlAnalysis, "seeding", 5);
            self.seed_queue().await?;
        }

        // Phase 3: Crawl.
        let pool = WorkerPool::new(self.queue.clone());
        let processor = self.processor.clone();
        let handles = pool.run(
            self.options.max_workers,
            move |item| {
                let processor = processor.clone();
                Box::pin(async move { processor.process(item).await })
            },
            {
                let running = self.running.clone();
                move || running.load(std::sync::atomic::Ordering::SeqCst)
            },
        );

        let shutdown_requested = self.await_completion_or_shutdown(&pool).await;

        for h in handles {
            let _ = tokio::time::timeout(Duration::from_secs(10), h).await;
        }

        // Phase 4: Finalize.
        if shutdown_requested {
            self.checkpoint_now().await?;
            self.emit(Stage::Error, "shutdown requested", 0);
            self.progress.retire(&self.job_id);
            anyhow::bail!("crawl interrupted by shutdown signal");
        }

        let summary = self.finalize(start).await?;
        self.emit(Stage::Complete, "crawl complete", 100);
        self.progress.retire(&self.job_id);
        Ok(summary)
    }

    /// URL/reason pairs for every item the queue gave up on. Exposed for
    /// callers that need to inspect failure causes beyond the aggregate
    /// count in `CrawlSummary`.
    #[must_use]
    pub fn failed_urls(&self) -> Vec<(String, String)> {
        self.queue.failed_urls()
    }

    /// Waits for the queue to drain while periodically pushing a
    /// queue-stats sample to the progress bus (every 1s), or
    /// until a shutdown signal arrives. Returns `true` if shutdown fired.
    async fn await_completion_or_shutdown(&self, pool: &WorkerPool) -> bool {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut signal_count = 0u8;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.queue.is_empty_and_idle() && self.queue.pending_len() == 0 {
                        pool.stop();
                        return false;
                    }
                    self.emit(
                        Stage::Scraping,
                        &format!(
                            "done={} failed={} pending={}",
                            self.queue.done_count(),
                            self.queue.failed_count(),
                            self.queue.pending_len()
                        ),
                        scraping_progress_pct(&self.queue),
                    );
                }
                _ = shutdown_signal() => {
                    signal_count += 1;
                    if signal_count == 1 {
                        log::warn!("shutdown signal received, flushing checkpoint and stopping");
                        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
                        pool.stop();
                        return true;
                    }
                    log::error!("second shutdown signal, forcing exit");
                    std::process::exit(1);
                }
            }
        }
    }

    /// Enqueues either a planned topic tree from `topic_planner` or the
    /// (already-resolved) seed alone, plus the optional API seed.
    async fn seed_queue(&self) -> anyhow::Result<()> {
        let seed_url = self.options.seed_url.clone();

        if let Some(planner) = &self.topic_planner {
            let topics = planner.plan(&seed_url, &self.options.framework_id).await?;
            if topics.is_empty() {
                log::warn!("topic planner returned no topics, falling back to seed_url alone");
                self.enqueue_seed(&seed_url, DocKind::Reference, true).await;
            } else {
                let mut stack = topics;
                while let Some(topic) = stack.pop() {
                    let metadata = ItemMetadata {
                        project: self.options.project.clone(),
                        kind: Some(DocKind::Reference),
                        is_index: true,
                    };
                    self.queue.add(&topic.url, topic.priority, metadata).await;
                    stack.extend(topic.subtopics);
                }
            }
        } else {
            self.enqueue_seed(&seed_url, DocKind::Reference, true).await;
        }

        if let Some(api_seed) = &self.options.api_seed_url {
            self.enqueue_seed(api_seed, DocKind::Api, true).await;
        }
        Ok(())
    }

    async fn enqueue_seed(&self, url: &str, kind: DocKind, is_index: bool) {
        let metadata = ItemMetadata {
            project: self.options.project.clone(),
            kind: Some(kind),
            is_index,
        };
        self.queue.add(url, Priority::High, metadata).await;
    }

    async fn restore_checkpoint_if_present(&self) -> anyhow::Result<bool> {
        if !self.options.checkpoint_enabled || self.options.clean {
            return Ok(false);
        }
        let Some((blob, queue_state)) = checkpoint::load(&self.options.checkpoint_path()).await?
        else {
            return Ok(false);
        };

        for (key, route) in blob.routes {
            self.processor.routes.insert(key, route);
        }
        for (kind_str, template) in blob.templates {
            if kind_str == DocKind::Reference.as_str() {
                self.processor.templates.insert(DocKind::Reference, template);
            } else if kind_str == DocKind::Api.as_str() {
                self.processor.templates.insert(DocKind::Api, template);
            }
        }
        for done_url in &queue_state.done {
            self.queue.mark_visited_from_checkpoint(done_url, true, None);
        }
        for (url, err) in &queue_state.failed {
            self.queue
                .mark_visited_from_checkpoint(url, false, Some(err.clone()));
        }
        let pending: Vec<_> = queue_state.pending.into_iter().map(Into::into).collect();
        self.queue.restore_pending(pending).await;
        self.resources.restore_cache(blob.static_cache);

        log::info!("resumed from checkpoint: {} routes, {} pending", self.processor.routes.len(), self.queue.pending_len());
        Ok(true)
    }

    async fn checkpoint_now(&self) -> anyhow::Result<()> {
        let (blob, queue_state) = self
            .processor
            .checkpoint_snapshot(
                vec![self.options.project.clone()],
                self.options.queue_state_path(),
            )
            .await;
        if let Err(e) = checkpoint::save(&self.options.checkpoint_path(), &blob, &queue_state).await {
            log::error!("checkpoint write failed: {e}");
        }
        Ok(())
    }

    async fn finalize(&self, start: std::time::Instant) -> anyhow::Result<CrawlSummary> {
        self.processor.drain_resource_tasks().await;
        self.checkpoint_now().await?;
        let duration_secs = start.elapsed().as_secs_f64();

        let routes: std::collections::HashMap<String, crate::types::RouteModel> = self
            .processor
            .routes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let routes_json = serde_json::to_vec_pretty(&routes)?;
        tokio::fs::write(self.options.output_dir.join("routes.json"), routes_json).await?;

        let metadata = serde_json::json!({
            "scrape_date": chrono::Utc::now().to_rfc3339(),
            "total_projects": 1,
            "projects": { self.options.project.clone(): { "name": self.options.project.clone(), "url": self.options.seed_url.clone() } },
            "total_routes": routes.len(),
            "total_static_resources": self.resources_downloaded(),
            "scrape_duration_seconds": duration_secs,
        });
        tokio::fs::write(
            self.options.output_dir.join("metadata.json"),
            serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        let summary_text = format!(
            "Crawl of {} complete.\nRoutes: {}\nFailed: {}\n",
            self.options.seed_url,
            routes.len(),
            self.queue.failed_count()
        );
        tokio::fs::write(self.options.output_dir.join("summary.txt"), summary_text).await?;

        tokio::fs::write(
            self.options.output_dir.join("index.html"),
            "<!doctype html><html><body>Documentation snapshot</body></html>",
        )
        .await?;

        checkpoint::delete(&self.options.checkpoint_path(), &self.options.queue_state_path()).await?;

        Ok(CrawlSummary {
            total_routes: routes.len(),
            total_static_resources: self.resources_downloaded(),
            total_failed: self.queue.failed_count(),
            duration_secs,
        })
    }

    fn resources_downloaded(&self) -> usize {
        self.resources.downloaded_count()
    }

    fn emit(&self, stage: Stage, message: &str, progress_pct: u8) {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.progress.emit(ProgressEvent::new(
            self.job_id.clone(),
            stage,
            message,
            progress_pct,
            now_ms,
        ));
    }
}

fn scraping_progress_pct(queue: &WorkQueue) -> u8 {
    let done = queue.done_count() as f64;
    let failed = queue.failed_count() as f64;
    let pending = queue.pending_len() as f64;
    let total = done + failed + pending;
    if total <= 0.0 {
        return 10;
    }
    (((done + failed) / total) * 90.0 + 10.0) as u8
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_page_crawl_writes_content_and_finalizes() {
        let mut server = mockito::Server::new_async().await;
        let page = r#"
            <html><head><title>Welcome</title></head>
            <body>
                <article class="doc">
                    <h1>Welcome</h1>
                    <p>Hello world.</p>
                </article>
            </body></html>
        "#;
        let mock = server
            .mock("GET", "/docs/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(page)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let seed_url = format!("{}/docs/", server.url());
        let options = CrawlerOptions::builder()
            .seed_url(seed_url.clone())
            .project("example".to_string())
            .output_dir(dir.path().to_path_buf())
            .max_workers(2)
            .rate_limit_rps(1000.0)
            .rate_limit_burst(100)
            .build();

        let engine = CrawlEngine::new(options, "job-1".to_string()).unwrap();
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.total_routes, 1);
        assert!(tokio::fs::try_exists(dir.path().join("routes.json")).await.unwrap());
        assert!(tokio::fs::try_exists(dir.path().join("metadata.json")).await.unwrap());
        assert!(tokio::fs::try_exists(dir.path().join("summary.txt")).await.unwrap());
        assert!(!tokio::fs::try_exists(dir.path().join(".scraper_checkpoint.json"))
            .await
            .unwrap());

        mock.assert_async().await;
    }

    struct StaticRegistry(String);

    impl crate::collaborators::FrameworkRegistry for StaticRegistry {
        fn resolve(&self, _framework_id: &str) -> Option<String> {
            Some(self.0.clone())
        }
    }

    #[tokio::test]
    async fn framework_registry_resolves_seed_when_none_given() {
        let mut server = mockito::Server::new_async().await;
        let page = r#"<html><head><title>Root</title></head>
            <body><article class="doc"><h1>Root</h1></article></body></html>"#;
        let mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_body(page)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let options = CrawlerOptions::builder()
            .framework_id("spring-boot".to_string())
            .project("example".to_string())
            .output_dir(dir.path().to_path_buf())
            .max_workers(1)
            .rate_limit_rps(1000.0)
            .rate_limit_burst(100)
            .build();

        let engine = CrawlEngine::with_collaborators(
            options,
            "job-registry".to_string(),
            Box::new(StaticRegistry(format!("{}/", server.url()))),
            None,
        )
        .unwrap();
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.total_routes, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_seed_without_registry_entry_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let options = CrawlerOptions::builder()
            .framework_id("unknown-framework".to_string())
            .project("example".to_string())
            .output_dir(dir.path().to_path_buf())
            .build();

        let err = CrawlEngine::new(options, "job-no-seed".to_string()).unwrap_err();
        assert!(err.to_string().contains("framework_registry"));
    }
}
