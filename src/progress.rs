//! Job-keyed progress event bus.
//!
//! Grounded on `crawl_events::bus::core::CrawlEventBus` (`tokio::sync::broadcast`
//! channel, `Notify`-driven graceful shutdown), generalized from a single
//! global channel into a registry keyed by `job_id`, and from a fixed
//! `CrawlEvent` enum to the open `ProgressEvent` shape and stage set.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Closed stage set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    UrlAnalysis,
    PageFetch,
    NavExtract,
    AiAnalysis,
    Validation,
    Scraping,
    Processing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub stage: Stage,
    pub message: String,
    pub progress_pct: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ts_ms: u64,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(job_id: impl Into<String>, stage: Stage, message: impl Into<String>, progress_pct: u8, now_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            stage,
            message: message.into(),
            progress_pct,
            details: None,
            error: None,
            ts_ms: now_ms,
        }
    }

    #[must_use]
    pub fn error(job_id: impl Into<String>, message: impl Into<String>, detail: impl Into<String>, now_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            stage: Stage::Error,
            message: message.into(),
            progress_pct: 0,
            details: None,
            error: Some(detail.into()),
            ts_ms: now_ms,
        }
    }
}

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out abstraction to an unspecified number of subscribers keyed by
/// `job_id`. The engine calls `emit`; it is oblivious to the transport.
pub struct ProgressBus {
    channels: DashMap<String, broadcast::Sender<ProgressEvent>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a given job, creating its channel lazily.
    #[must_use]
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// `emit(job_id, event)`. Silently drops the event if there are no
    /// subscribers; `broadcast::Sender::send` only errors when the receiver
    /// count is zero, which is an acceptable outcome for a progress stream.
    pub fn emit(&self, event: ProgressEvent) {
        let job_id = event.job_id.clone();
        let sender = self
            .channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        let _ = sender.send(event);
    }

    /// Remove a job's channel once its crawl has fully completed or
    /// errored, so the registry doesn't grow unbounded across many jobs.
    pub fn retire(&self, job_id: &str) {
        self.channels.remove(job_id);
    }
}
