//! Per-item processing pipeline.
//!
//! Grounded on `crawl_engine::page_processor::process_single_page`'s 8-step
//! shape, with the browser-driven steps (navigate, screenshot) replaced by
//! the HTTP fetcher and static HTML parsing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use scraper::{Html, Selector};
use tokio::sync::Mutex as AsyncMutex;

use crate::checkpoint::{CheckpointBlob, PendingItem, QueueStateFile};
use crate::error::{CrawlError, FailureKind};
use crate::extractor;
use crate::fetcher::Fetcher;
use crate::progress::{ProgressBus, ProgressEvent, Stage};
use crate::queue::{AddOutcome, QueueItem, WorkQueue};
use crate::resources::ResourceDownloader;
use crate::types::{hash8, route_key, DocKind, ItemMetadata, Priority, ResourceKind, ResourceRef, RouteModel, ScrapedContent, TemplateSlot};
use crate::url_normalize;
use crate::worker_pool::ProcessOutcome;

pub struct PageProcessor {
    pub fetcher: Arc<Fetcher>,
    pub queue: Arc<WorkQueue>,
    pub resources: Arc<ResourceDownloader>,
    pub progress: Arc<ProgressBus>,
    pub job_id: String,
    pub output_dir: PathBuf,
    pub seed_url: String,

    pub templates: DashMap<DocKind, TemplateSlot>,
    pub templates_lock: AsyncMutex<()>,
    pub routes: DashMap<String, RouteModel>,
    pub content_written: std::sync::atomic::AtomicU64,

    /// Resource downloads are fire-and-forget from a worker's point of
    /// view (a page is done once its own content is written), but the
    /// engine must still be able to wait for them to settle before
    /// finalizing. Tracked here rather than joined inline.
    pub resource_tasks: AsyncMutex<tokio::task::JoinSet<()>>,
}

impl PageProcessor {
    /// Processes one popped item end to end. Returns `Success` on a
    /// retained (or intentionally skipped) page, `Retry` with a reason
    /// string when the item should be retried/failed by the queue, or
    /// `Fail` when the fetcher has already exhausted its own retry budget
    /// and the queue must not layer a second one on top.
    pub async fn process(&self, item: QueueItem) -> anyhow::Result<ProcessOutcome> {
        self.emit(Stage::PageFetch, &format!("fetching {}", item.url), 10);

        let html = match self.fetcher.fetch_text(&item.url).await {
            Ok(html) => html,
            Err(e) => {
                let kind = FailureKind::classify(&e);
                log::warn!(
                    "fetch failed for {} ({kind:?}, retryable={}), fetcher already exhausted its own retry budget",
                    item.url,
                    kind.is_retryable()
                );
                return Ok(ProcessOutcome::Fail(e.to_string()));
            }
        };

        let kind = item.metadata.kind.unwrap_or(DocKind::Reference);
        let project = item.metadata.project.clone();

        self.ensure_template(kind, &html).await?;

        self.emit(Stage::NavExtract, &format!("extracting {}", item.url), 40);
        let Some(content) = extractor::extract(&html, kind, &project) else {
            return Ok(ProcessOutcome::Retry(CrawlError::Parse(
                "no recognizable content container".to_string(),
            )
            .to_string()));
        };

        self.write_content(&item.url, kind, &project, &content)
            .await?;

        if item.metadata.is_index {
            self.enqueue_navigation(&content, &item.url, &project, kind)
                .await;
        }

        self.handoff_resources(&html, &item.url).await;

        self.emit(Stage::Processing, &format!("done {}", item.url), 80);
        Ok(ProcessOutcome::Success)
    }

    async fn ensure_template(&self, kind: DocKind, html: &str) -> anyhow::Result<()> {
        if self.templates.contains_key(&kind) {
            return Ok(());
        }
        let _guard = self.templates_lock.lock().await;
        if self.templates.contains_key(&kind) {
            return Ok(());
        }
        let Some(skin) = extractor::extract_template_skin(html, kind) else {
            return Ok(());
        };
        let path = self.output_dir.join("templates").join(format!("{kind}.html"));
        tokio::fs::write(&path, &skin).await?;
        self.templates.insert(
            kind,
            TemplateSlot {
                kind,
                skin_html: skin,
                path,
            },
        );
        Ok(())
    }

    async fn write_content(
        &self,
        url: &str,
        kind: DocKind,
        project: &str,
        content: &ScrapedContent,
    ) -> anyhow::Result<()> {
        let normalized = url_normalize::normalize(url)?;
        let filename = format!("{project}-{kind}-{}.json", hash8(normalized.as_str()));
        let path = self.output_dir.join("content").join(&filename);
        let json = serde_json::to_vec_pretty(content)?;
        tokio::fs::write(&path, &json).await?;

        let parsed = url::Url::parse(url)?;
        let is_index = self
            .routes
            .iter()
            .filter(|r| r.value().project == project && r.value().kind == kind)
            .count()
            == 0;
        let key = route_key(project, kind, parsed.path(), is_index);

        if self.routes.contains_key(&key) {
            log::warn!("route_key collision for {key}, last writer wins");
        }
        self.routes.insert(
            key.clone(),
            RouteModel {
                route_key: key,
                content_file: filename,
                title: content.title.clone(),
                project: project.to_string(),
                kind,
            },
        );
        self.content_written
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    async fn enqueue_navigation(
        &self,
        content: &ScrapedContent,
        page_url: &str,
        project: &str,
        kind: DocKind,
    ) {
        let Some(nav) = &content.nav_tree else {
            return;
        };
        let Ok(base) = url::Url::parse(page_url) else {
            return;
        };

        let mut stack = vec![nav];
        while let Some(node) = stack.pop() {
            for child in &node.children {
                stack.push(child);
                if child.href.is_empty() || child.href.starts_with('#') {
                    continue;
                }
                let Ok(resolved) = base.join(&child.href) else {
                    continue;
                };
                let resolved_str = resolved.to_string();
                if !url_normalize::in_scope(&resolved_str, &self.seed_url)
                    || url_normalize::should_skip(&resolved_str)
                {
                    continue;
                }
                let metadata = ItemMetadata {
                    project: project.to_string(),
                    kind: Some(kind),
                    is_index: false,
                };
                let outcome = self
                    .queue
                    .add(&resolved_str, Priority::Normal, metadata)
                    .await;
                if matches!(outcome, AddOutcome::DroppedQueueFull) {
                    log::warn!("queue full, dropped discovered link {resolved_str}");
                }
            }
        }
    }

    async fn handoff_resources(&self, html: &str, page_url: &str) {
        let Ok(base) = url::Url::parse(page_url) else {
            return;
        };
        let mut tasks = self.resource_tasks.lock().await;
        for resource in extract_resource_refs(html, &base) {
            let resources = self.resources.clone();
            tasks.spawn(async move {
                if let Err(e) = resources.download(&resource).await {
                    log::warn!("resource download failed for {}: {e}", resource.url);
                }
            });
        }
    }

    /// Wait for every resource download spawned so far to finish. Called
    /// by the engine before it samples `resources_downloaded()` and writes
    /// the finalize-phase files.
    pub async fn drain_resource_tasks(&self) {
        let mut tasks = self.resource_tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }

    fn emit(&self, stage: Stage, message: &str, progress_pct: u8) {
        let now_ms = now_ms();
        self.progress.emit(ProgressEvent::new(
            self.job_id.clone(),
            stage,
            message,
            progress_pct,
            now_ms,
        ));
    }

    /// Snapshot enough state to checkpoint: routes, static cache,
    /// templates, and pending queue items.
    pub async fn checkpoint_snapshot(
        &self,
        projects: Vec<String>,
        queue_state_path: PathBuf,
    ) -> (CheckpointBlob, QueueStateFile) {
        let routes: HashMap<String, RouteModel> = self
            .routes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let templates: HashMap<String, TemplateSlot> = self
            .templates
            .iter()
            .map(|e| (e.key().to_string(), e.value().clone()))
            .collect();

        let pending: Vec<PendingItem> = self
            .queue
            .pending_snapshot()
            .await
            .iter()
            .map(PendingItem::from)
            .collect();
        let failed: HashMap<String, String> = self.queue.failed_urls().into_iter().collect();
        let done: Vec<String> = self.queue.done_urls();

        let blob = CheckpointBlob {
            projects,
            routes,
            static_cache: self.resources.cache_snapshot(),
            templates,
            queue_state_path,
            total_queued: self
                .queue
                .stats
                .total_queued
                .load(std::sync::atomic::Ordering::Relaxed),
            total_processed: self
                .queue
                .stats
                .total_processed
                .load(std::sync::atomic::Ordering::Relaxed),
            total_failed: self
                .queue
                .stats
                .total_failed
                .load(std::sync::atomic::Ordering::Relaxed),
            total_retried: self
                .queue
                .stats
                .total_retried
                .load(std::sync::atomic::Ordering::Relaxed),
        };

        let queue_state = QueueStateFile {
            pending,
            done,
            failed,
        };

        (blob, queue_state)
    }
}

/// Extract stylesheet links, script srcs and image srcs from the DOM,
/// resolving relative URLs and skipping external/data URIs.
fn extract_resource_refs(html: &str, base: &url::Url) -> Vec<ResourceRef> {
    let doc = Html::parse_document(html);
    let mut refs = Vec::new();

    if let Ok(sel) = Selector::parse(r#"link[rel="stylesheet"]"#) {
        for el in doc.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                push_resource(&mut refs, base, href, ResourceKind::Css);
            }
        }
    }
    if let Ok(sel) = Selector::parse("script[src]") {
        for el in doc.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                push_resource(&mut refs, base, src, ResourceKind::Js);
            }
        }
    }
    if let Ok(sel) = Selector::parse("img[src]") {
        for el in doc.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                push_resource(&mut refs, base, src, ResourceKind::Img);
            }
        }
    }

    refs
}

fn push_resource(refs: &mut Vec<ResourceRef>, base: &url::Url, raw: &str, kind: ResourceKind) {
    if raw.starts_with("data:") {
        return;
    }
    let Ok(resolved) = base.join(raw) else {
        return;
    };
    // Cross-origin static assets (e.g. a CDN-hosted font) are still
    // downloaded; only page URLs are subject to in-scope/skip rules.
    refs.push(ResourceRef {
        url: resolved.to_string(),
        kind,
        local_path: None,
        size_bytes: None,
    });
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_resource_refs_resolves_relative_urls() {
        let html = r#"
            <html><head>
                <link rel="stylesheet" href="./s.css">
                <script src="/app.js"></script>
            </head><body>
                <img src="images/logo.png">
            </body></html>
        "#;
        let base = url::Url::parse("https://example.org/docs/").unwrap();
        let refs = extract_resource_refs(html, &base);

        assert_eq!(refs.len(), 3);
        assert!(refs.iter().any(|r| r.url == "https://example.org/docs/s.css"));
        assert!(refs.iter().any(|r| r.url == "https://example.org/app.js"));
        assert!(refs
            .iter()
            .any(|r| r.url == "https://example.org/docs/images/logo.png"));
    }

    #[test]
    fn extract_resource_refs_skips_data_uris() {
        let html = r#"<img src="data:image/png;base64,abc">"#;
        let base = url::Url::parse("https://example.org/docs/").unwrap();
        let refs = extract_resource_refs(html, &base);
        assert!(refs.is_empty());
    }
}
