//! Fixed-size worker pool consuming the work queue.
//!
//! Grounded on `async_queue.py::worker()`'s loop shape (pop with timeout,
//! processing-set bracket, `finally`-equivalent cleanup on every path) and
//! the `tokio::spawn` + task-management idiom in
//! `crawl_engine::orchestrator::crawl_pages`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::queue::{QueueItem, WorkQueue};

const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of processing a single item, as reported by the caller-supplied
/// processor closure. `Retry` consumes the queue's own retry budget (for
/// errors the fetcher's retry/backoff loop never saw, e.g. a write failure
/// or an unparseable page); `Fail` is terminal and skips that budget
/// entirely, since the fetcher has already exhausted its own retries for
/// transport/HTTP errors before returning one.
pub enum ProcessOutcome {
    Success,
    Retry(String),
    Fail(String),
}

type ProcessorFuture = Pin<Box<dyn Future<Output = anyhow::Result<ProcessOutcome>> + Send>>;

/// Runs `worker_count` concurrent consumers against `queue`, invoking
/// `processor` for each popped item until `shutdown` is notified and the
/// queue has drained.
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    shutdown: Arc<Notify>,
    shutdown_flag: Arc<std::sync::atomic::AtomicBool>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self {
            queue,
            shutdown: Arc::new(Notify::new()),
            shutdown_flag: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Ask all workers to exit after their current item. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown_flag.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.shutdown.notify_waiters();
        }
    }

    /// Spawn `worker_count` tasks, each looping pop→process→settle until
    /// shutdown. `processor` must be `Clone` so each worker can own one.
    pub fn run<F>(
        &self,
        worker_count: usize,
        processor: impl Fn(QueueItem) -> ProcessorFuture + Send + Sync + 'static,
        running_flag: F,
    ) -> Vec<tokio::task::JoinHandle<()>>
    where
        F: Fn() -> bool + Send + Sync + Clone + 'static,
    {
        let processor = Arc::new(processor);
        let mut handles = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let queue = self.queue.clone();
            let shutdown_flag = self.shutdown_flag.clone();
            let processor = processor.clone();
            let running_flag = running_flag.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if shutdown_flag.load(std::sync::atomic::Ordering::SeqCst) && !running_flag() {
                        break;
                    }

                    let Some(item) = queue.pop(POP_TIMEOUT).await else {
                        if shutdown_flag.load(std::sync::atomic::Ordering::SeqCst) {
                            break;
                        }
                        continue;
                    };

                    let url = item.url.clone();
                    let result = processor(item.clone()).await;

                    match result {
                        Ok(ProcessOutcome::Success) => {
                            queue.mark_done(&url);
                        }
                        Ok(ProcessOutcome::Retry(reason)) => {
                            queue.mark_failed(item, reason).await;
                        }
                        Ok(ProcessOutcome::Fail(reason)) => {
                            queue.mark_permanently_failed(item, reason);
                        }
                        Err(e) => {
                            log::warn!("worker {worker_id} failed on {url}: {e}");
                            queue.mark_failed(item, e.to_string()).await;
                        }
                    }
                }
                log::debug!("worker {worker_id} exiting");
            }));
        }

        handles
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemMetadata, Priority};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn processes_all_items_then_idles() {
        let queue = Arc::new(WorkQueue::new(100, 3));
        for i in 0..10 {
            queue
                .add(
                    &format!("https://example.com/{i}"),
                    Priority::Normal,
                    ItemMetadata::default(),
                )
                .await;
        }

        let pool = WorkerPool::new(queue.clone());
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();

        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let running_clone = running.clone();

        let handles = pool.run(
            4,
            move |_item| {
                let processed = processed_clone.clone();
                Box::pin(async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(ProcessOutcome::Success)
                })
            },
            move || running_clone.load(Ordering::SeqCst),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        running.store(false, Ordering::SeqCst);
        pool.stop();

        for h in handles {
            let _ = tokio::time::timeout(Duration::from_secs(2), h).await;
        }

        assert_eq!(processed.load(Ordering::SeqCst), 10);
        assert_eq!(queue.done_count(), 10);
    }
}
