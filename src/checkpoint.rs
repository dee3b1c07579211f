//! Checkpoint & resume.
//!
//! Grounded on `async_queue.py::save_state`/`load_state` for the
//! pending-items dump/restore shape, and
//! `async_spring_scraper_enhanced.py`'s two-file split
//! (`.scraper_checkpoint.json` referencing a companion
//! `.queue_state.json`). Atomic write (temp file + rename) follows this
//! crate's general `tokio::fs` usage convention.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::queue::QueueItem;
use crate::types::{ItemMetadata, Priority, RouteModel, TemplateSlot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingItem {
    pub url: String,
    pub priority: Priority,
    pub metadata: ItemMetadata,
    pub retry_count: u8,
    pub created_at: u64,
}

impl From<&QueueItem> for PendingItem {
    fn from(item: &QueueItem) -> Self {
        Self {
            url: item.url.clone(),
            priority: item.priority,
            metadata: item.metadata.clone(),
            retry_count: item.retry_count,
            created_at: item.created_at,
        }
    }
}

impl From<PendingItem> for QueueItem {
    fn from(p: PendingItem) -> Self {
        Self {
            url: p.url,
            priority: p.priority,
            metadata: p.metadata,
            retry_count: p.retry_count,
            created_at: p.created_at,
        }
    }
}

/// Companion queue-state file: referenced from the main checkpoint by
/// path, keeping the (potentially large) pending-item list out of the
/// primary blob.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStateFile {
    pub pending: Vec<PendingItem>,
    pub done: Vec<String>,
    pub failed: HashMap<String, String>,
}

/// Opaque serialized form covering projects, routes, visited sets, static
/// cache, and templates. References the companion queue-state file by
/// path rather than embedding it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointBlob {
    pub projects: Vec<String>,
    pub routes: HashMap<String, RouteModel>,
    pub static_cache: HashMap<String, String>,
    pub templates: HashMap<String, TemplateSlot>,
    pub queue_state_path: PathBuf,

    pub total_queued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_retried: u64,
}

/// Writes `blob` and its companion queue-state file atomically (temp file
/// + rename) to `checkpoint_path`/`queue_state_path`. A failure here is
/// logged, not fatal, per the error-handling table.
pub async fn save(
    checkpoint_path: &Path,
    blob: &CheckpointBlob,
    queue_state: &QueueStateFile,
) -> anyhow::Result<()> {
    atomic_write_json(&blob.queue_state_path, queue_state).await?;
    atomic_write_json(checkpoint_path, blob).await?;
    Ok(())
}

async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    tokio::fs::write(tmp.path(), &json).await?;
    tmp.persist(path)
        .map_err(|e| anyhow::anyhow!("failed to persist checkpoint {}: {e}", path.display()))?;
    Ok(())
}

pub async fn load(checkpoint_path: &Path) -> anyhow::Result<Option<(CheckpointBlob, QueueStateFile)>> {
    if !tokio::fs::try_exists(checkpoint_path).await? {
        return Ok(None);
    }
    let blob_bytes = tokio::fs::read(checkpoint_path).await?;
    let blob: CheckpointBlob = serde_json::from_slice(&blob_bytes)?;

    let queue_state = if tokio::fs::try_exists(&blob.queue_state_path).await? {
        let bytes = tokio::fs::read(&blob.queue_state_path).await?;
        serde_json::from_slice(&bytes)?
    } else {
        QueueStateFile::default()
    };

    Ok(Some((blob, queue_state)))
}

/// Finalization deletes the checkpoint on successful completion.
pub async fn delete(checkpoint_path: &Path, queue_state_path: &Path) -> anyhow::Result<()> {
    for path in [checkpoint_path, queue_state_path] {
        if tokio::fs::try_exists(path).await? {
            tokio::fs::remove_file(path).await?;
        }
    }
    Ok(())
}
