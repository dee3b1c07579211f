//! Deduplicating, bounded, priority work queue.
//!
//! Grounded on `original_source/backend/src/async_queue.py::URLQueue`:
//! dedup via a seen-set, drop-silent-on-full (removing from the seen-set so
//! a later retry can succeed), retry-at-LOW-priority, and a `finally`-style
//! clear of the processing set on every exit path. Concurrent set types
//! follow the pervasive `DashMap`/`DashSet` idiom used throughout this crate.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;

use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;

use crate::types::{ItemMetadata, Priority};
use crate::url_normalize::{self, NormalizedURL, URLPattern};

/// `{url, priority, metadata, retry_count, created_at}`. Ordering key:
/// `(priority, created_at)`.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub url: String,
    pub priority: Priority,
    pub metadata: ItemMetadata,
    pub retry_count: u8,
    pub created_at: u64,
}

impl QueueItem {
    #[must_use]
    pub fn new(url: String, priority: Priority, metadata: ItemMetadata, created_at: u64) -> Self {
        Self {
            url,
            priority,
            metadata,
            retry_count: 0,
            created_at,
        }
    }
}

/// Min-heap entry: lower `priority` discriminant and earlier `created_at`
/// pop first.
#[derive(Debug, Clone)]
struct HeapEntry(QueueItem);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.created_at == other.0.created_at
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse both keys so the "smallest"
        // (priority, created_at) pair pops first.
        other
            .0
            .priority
            .cmp(&self.0.priority)
            .then_with(|| other.0.created_at.cmp(&self.0.created_at))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Enqueued,
    AlreadyVisited,
    DroppedPatternCollapse,
    DroppedQueueFull,
}

/// The priority + FIFO-within-priority work queue with dedup, retry and
/// terminal-state bookkeeping.
pub struct WorkQueue {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    capacity: usize,
    max_retries: u8,

    visited: DashSet<String>,
    processing: DashSet<String>,
    done: DashSet<String>,
    failed: DashMap<String, String>,
    patterns: DashSet<String>,

    next_seq: std::sync::atomic::AtomicU64,

    pub stats: QueueStats,
}

#[derive(Debug, Default)]
pub struct QueueStats {
    pub total_queued: std::sync::atomic::AtomicU64,
    pub total_processed: std::sync::atomic::AtomicU64,
    pub total_failed: std::sync::atomic::AtomicU64,
    pub total_retried: std::sync::atomic::AtomicU64,
}

impl WorkQueue {
    #[must_use]
    pub fn new(capacity: usize, max_retries: u8) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            capacity,
            max_retries,
            visited: DashSet::new(),
            processing: DashSet::new(),
            done: DashSet::new(),
            failed: DashMap::new(),
            patterns: DashSet::new(),
            next_seq: std::sync::atomic::AtomicU64::new(0),
            stats: QueueStats::default(),
        }
    }

    fn next_created_at(&self) -> u64 {
        self.next_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Normalize; reject if already in `VisitedSet`. Compute the pattern;
    /// if the pattern is already known and the URL looks dynamic, drop it.
    /// Otherwise enqueue, recording the URL as visited and its pattern as
    /// seen.
    pub async fn add(&self, url: &str, priority: Priority, metadata: ItemMetadata) -> AddOutcome {
        let Ok(normalized) = url_normalize::normalize(url) else {
            return AddOutcome::AlreadyVisited;
        };
        let key = normalized.as_str().to_string();

        if self.visited.contains(&key) {
            return AddOutcome::AlreadyVisited;
        }

        let pat = url_normalize::pattern(&normalized);
        if self.patterns.contains(pat.as_str()) && url_normalize::is_likely_dynamic(url) {
            return AddOutcome::DroppedPatternCollapse;
        }

        let created_at = self.next_created_at();
        let item = QueueItem::new(key.clone(), priority, metadata, created_at);

        {
            let mut heap = self.heap.lock().await;
            if heap.len() >= self.capacity {
                log::warn!("work queue at capacity ({}), dropping {key}", self.capacity);
                return AddOutcome::DroppedQueueFull;
            }
            heap.push(HeapEntry(item));
        }

        self.visited.insert(key);
        self.patterns.insert(pat.as_str().to_string());
        self.stats
            .total_queued
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        AddOutcome::Enqueued
    }

    /// Blocking pop with a timeout, so callers can poll a shutdown flag.
    pub async fn pop(&self, timeout: std::time::Duration) -> Option<QueueItem> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut heap = self.heap.lock().await;
                if let Some(HeapEntry(item)) = heap.pop() {
                    drop(heap);
                    self.processing.insert(item.url.clone());
                    return Some(item);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    /// Move a URL from `ProcessingSet` to `DoneSet`.
    pub fn mark_done(&self, url: &str) {
        self.processing.remove(url);
        self.done.insert(url.to_string());
        self.stats
            .total_processed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// If `retry_count < max_retries`, re-enqueue at LOW priority
    /// preserving `created_at`; else move to `FailedMap`.
    pub async fn mark_failed(&self, mut item: QueueItem, error: String) {
        self.processing.remove(&item.url);

        if item.retry_count < self.max_retries {
            item.retry_count += 1;
            item.priority = Priority::Low;
            self.stats
                .total_retried
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let mut heap = self.heap.lock().await;
            heap.push(HeapEntry(item));
        } else {
            self.failed.insert(item.url.clone(), error);
            self.stats
                .total_failed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Move straight to `FailedMap` without consuming a retry slot. For
    /// dispositions the caller has already decided are terminal (e.g. the
    /// fetcher exhausted its own retry/backoff budget), so this never
    /// stacks a second retry cycle on top of one the fetcher already ran.
    pub fn mark_permanently_failed(&self, item: QueueItem, error: String) {
        self.processing.remove(&item.url);
        self.failed.insert(item.url, error);
        self.stats
            .total_failed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_empty_and_idle(&self) -> bool {
        self.processing.is_empty()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        // Approximate: caller must hold no expectation of exactness across
        // the async boundary; used only for progress sampling.
        self.visited.len() - self.done.len() - self.failed.len()
    }

    #[must_use]
    pub fn done_count(&self) -> usize {
        self.done.len()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    #[must_use]
    pub fn is_done(&self, url: &str) -> bool {
        self.done.contains(url)
    }

    #[must_use]
    pub fn failed_urls(&self) -> Vec<(String, String)> {
        self.failed
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    #[must_use]
    pub fn done_urls(&self) -> Vec<String> {
        self.done.iter().map(|e| e.clone()).collect()
    }

    /// Snapshot of pending items for checkpointing, without draining the
    /// heap (the heap is rebuilt from the snapshot on resume, not mutated
    /// here).
    pub async fn pending_snapshot(&self) -> Vec<QueueItem> {
        let heap = self.heap.lock().await;
        heap.iter().map(|e| e.0.clone()).collect()
    }

    /// Restore pending items (and their visited/pattern membership) from a
    /// checkpoint, without re-running `add`'s dedup/pattern-collapse logic
    /// since these items already passed it in the original run.
    pub async fn restore_pending(&self, items: Vec<QueueItem>) {
        let mut heap = self.heap.lock().await;
        for item in items {
            self.visited.insert(item.url.clone());
            if let Ok(n) = url_normalize::normalize(&item.url) {
                self.patterns
                    .insert(url_normalize::pattern(&n).as_str().to_string());
            }
            heap.push(HeapEntry(item));
        }
    }

    pub fn mark_visited_from_checkpoint(&self, url: &str, done: bool, error: Option<String>) {
        self.visited.insert(url.to_string());
        if done {
            self.done.insert(url.to_string());
        } else if let Some(err) = error {
            self.failed.insert(url.to_string(), err);
        }
    }
}

pub fn normalized_key(url: &str) -> Option<NormalizedURL> {
    url_normalize::normalize(url).ok()
}

pub fn pattern_key(normalized: &NormalizedURL) -> URLPattern {
    url_normalize::pattern(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn priority_ordering_respected() {
        let q = WorkQueue::new(100, 3);
        q.add("https://example.com/low", Priority::Low, ItemMetadata::default())
            .await;
        q.add(
            "https://example.com/high",
            Priority::High,
            ItemMetadata::default(),
        )
        .await;
        q.add(
            "https://example.com/critical",
            Priority::Critical,
            ItemMetadata::default(),
        )
        .await;

        let first = q.pop(std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.url, "https://example.com/critical");
        let second = q.pop(std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.url, "https://example.com/high");
        let third = q.pop(std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(third.url, "https://example.com/low");
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let q = WorkQueue::new(100, 3);
        q.add("https://example.com/a", Priority::Normal, ItemMetadata::default())
            .await;
        q.add("https://example.com/b", Priority::Normal, ItemMetadata::default())
            .await;

        let first = q.pop(std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.url, "https://example.com/a");
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let q = WorkQueue::new(100, 3);
        let outcome1 = q
            .add("https://example.com/a", Priority::Normal, ItemMetadata::default())
            .await;
        let outcome2 = q
            .add("https://example.com/a", Priority::Normal, ItemMetadata::default())
            .await;
        assert_eq!(outcome1, AddOutcome::Enqueued);
        assert_eq!(outcome2, AddOutcome::AlreadyVisited);
    }

    #[tokio::test]
    async fn queue_full_drops_and_unvisits() {
        let q = WorkQueue::new(1, 3);
        let first = q
            .add("https://example.com/a", Priority::Normal, ItemMetadata::default())
            .await;
        let second = q
            .add("https://example.com/b", Priority::Normal, ItemMetadata::default())
            .await;
        assert_eq!(first, AddOutcome::Enqueued);
        assert_eq!(second, AddOutcome::DroppedQueueFull);
        assert!(!q.visited.contains("https://example.com/b"));
    }

    #[tokio::test]
    async fn retry_requeues_at_low_priority() {
        let q = WorkQueue::new(100, 3);
        q.add(
            "https://example.com/a",
            Priority::Critical,
            ItemMetadata::default(),
        )
        .await;
        let item = q.pop(std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(item.retry_count, 0);

        q.mark_failed(item, "boom".to_string()).await;
        let retried = q.pop(std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(retried.priority, Priority::Low);
        assert_eq!(retried.retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_move_to_failed_map() {
        let q = WorkQueue::new(100, 1);
        q.add("https://example.com/a", Priority::Normal, ItemMetadata::default())
            .await;

        let item = q.pop(std::time::Duration::from_millis(10)).await.unwrap();
        q.mark_failed(item, "first failure".to_string()).await;

        let item = q.pop(std::time::Duration::from_millis(10)).await.unwrap();
        q.mark_failed(item, "second failure".to_string()).await;

        assert!(q.pop(std::time::Duration::from_millis(10)).await.is_none());
        assert_eq!(q.failed_count(), 1);
    }

    #[tokio::test]
    async fn permanently_failed_skips_retry_budget() {
        let q = WorkQueue::new(100, 3);
        q.add("https://example.com/a", Priority::Normal, ItemMetadata::default())
            .await;
        let item = q.pop(std::time::Duration::from_millis(10)).await.unwrap();

        q.mark_permanently_failed(item, "500".to_string());

        assert!(q.pop(std::time::Duration::from_millis(10)).await.is_none());
        assert_eq!(q.failed_count(), 1);
        assert_eq!(q.stats.total_retried.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn pattern_collapse_drops_repeated_dynamic_routes() {
        let q = WorkQueue::new(1000, 3);
        for i in 1..=500 {
            q.add(
                &format!("https://example.com/posts/{i}"),
                Priority::Normal,
                ItemMetadata::default(),
            )
            .await;
        }
        // Only the first of the pattern family should have been enqueued.
        assert_eq!(q.pending_len(), 1);
    }
}
