//! Resource downloader: CSS/JS/img/font fetch, cache and CSS `url()`
//! recursion.
//!
//! Grounded on `inline_css::{css_downloader, image_downloader, svg_downloader,
//! domain_queue}` (concurrent per-type downloads behind a write-once cache)
//! and `async_spring_scraper_enhanced.py`'s CSS `url(...)` regex scan for
//! recursive discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::fetcher::Fetcher;
use crate::types::{hash8, ResourceKind, ResourceRef};

static CSS_URL_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(["']?([^"'()]+)["']?\)"#).unwrap());

/// Write-once URL→local-path cache plus the downloading logic itself.
pub struct ResourceDownloader {
    fetcher: Arc<Fetcher>,
    output_dir: PathBuf,
    cache: DashMap<String, String>,
}

impl ResourceDownloader {
    #[must_use]
    pub fn new(fetcher: Arc<Fetcher>, output_dir: PathBuf) -> Self {
        Self {
            fetcher,
            output_dir,
            cache: DashMap::new(),
        }
    }

    #[must_use]
    pub fn cached_path(&self, url: &str) -> Option<String> {
        self.cache.get(url).map(|e| e.clone())
    }

    #[must_use]
    pub fn downloaded_count(&self) -> usize {
        self.cache.len()
    }

    /// Snapshot the URL→local-path cache for checkpointing.
    #[must_use]
    pub fn cache_snapshot(&self) -> HashMap<String, String> {
        self.cache
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Repopulate the cache from a checkpoint. Existing entries win over
    /// restored ones in case anything was already downloaded this run.
    pub fn restore_cache(&self, entries: HashMap<String, String>) {
        for (url, path) in entries {
            self.cache.entry(url).or_insert(path);
        }
    }

    /// Fetches `resource` if and only if its URL is not already cached; on
    /// success writes the body under the correct subtree and inserts the
    /// `url → relative_path` mapping. Recurses into CSS `url(...)`
    /// references.
    pub async fn download(&self, resource: &ResourceRef) -> anyhow::Result<Option<String>> {
        if let Some(existing) = self.cached_path(&resource.url) {
            return Ok(Some(existing));
        }

        let bytes = match self.fetcher.fetch_bytes(&resource.url).await {
            Ok(b) => b,
            Err(e) => {
                log::warn!("failed to download resource {}: {e}", resource.url);
                return Ok(None);
            }
        };

        let filename = filename_for(&resource.url);
        let relative_path = format!("{}/{}", resource.kind.subtree(), filename);
        let full_path = self.output_dir.join(&relative_path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let is_text = matches!(
            resource.kind,
            ResourceKind::Css | ResourceKind::Js
        ) || resource.url.ends_with(".svg");

        if is_text {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            tokio::fs::write(&full_path, &text).await?;
        } else {
            tokio::fs::write(&full_path, &bytes).await?;
        }

        // First writer wins; a concurrent writer for the same URL will
        // simply overwrite its own in-flight duplicate work with an
        // identical value.
        self.cache
            .entry(resource.url.clone())
            .or_insert_with(|| relative_path.clone());

        if resource.kind == ResourceKind::Css {
            let css_text = String::from_utf8_lossy(&bytes).into_owned();
            self.enqueue_css_references(&resource.url, &css_text).await;
        }

        Ok(Some(relative_path))
    }

    /// Scan CSS text for `url(...)` references, resolve relative to the
    /// CSS file's own URL, classify by extension, and recursively
    /// download. The CSS file itself is left untouched — no local-path
    /// rewriting is performed, per the preserved original behavior noted
    /// in DESIGN.md.
    async fn enqueue_css_references(&self, css_url: &str, css_text: &str) {
        let Ok(base) = url::Url::parse(css_url) else {
            return;
        };

        for caps in CSS_URL_REF.captures_iter(css_text) {
            let raw = caps.get(1).map_or("", |m| m.as_str()).trim();
            if raw.starts_with("data:") {
                continue;
            }
            let Ok(resolved) = base.join(raw) else {
                continue;
            };
            let resolved_str = resolved.to_string();
            if self.cached_path(&resolved_str).is_some() {
                continue;
            }
            let kind = ResourceKind::from_extension(resolved.path());
            let resource = ResourceRef {
                url: resolved_str,
                kind,
                local_path: None,
                size_bytes: None,
            };
            if let Err(e) = self.download(&resource).await {
                log::warn!("failed to follow css reference {raw}: {e}");
            }
        }
    }
}

/// Last path segment of the URL; if empty, `hash8(url)`.
fn filename_for(url: &str) -> String {
    let parsed = url::Url::parse(url);
    let segment = parsed
        .as_ref()
        .ok()
        .and_then(|u| u.path_segments())
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    match segment {
        Some(name) => sanitize_filename::sanitize(name),
        None => hash8(url),
    }
}
