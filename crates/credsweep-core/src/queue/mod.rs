//! C5 — Scan Queue.
//!
//! Decouples per-run enumeration (the producer, in `orchestrator.rs`)
//! from the work of downloading and scanning artifacts and job traces
//! (the consumer), so one slow artifact never stalls listing and queue
//! memory stays bounded by disk spillover.

pub mod disk;
pub mod item;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

pub use disk::{DiskQueue, QueueStatus};
pub use item::QueueItem;

/// Whatever a worker does with one dequeued item — wired by the
/// orchestrator to the provider adapter plus C2/C3/C4.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: QueueItem);
}

/// Fixed-size pool of workers draining one `DiskQueue`. Each worker pops one item, hands it to the handler,
/// and marks it complete; workers never block the producer.
pub struct WorkerPool {
    queue: Arc<DiskQueue>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(queue: Arc<DiskQueue>, workers: usize) -> Self {
        Self { queue, workers: workers.max(1) }
    }

    /// Runs until the queue reports shutdown (its `next()` returns
    /// `None` to every worker).
    pub async fn run(self, handler: Arc<dyn ItemHandler>) {
        let mut set = JoinSet::new();
        for _ in 0..self.workers {
            let queue = self.queue.clone();
            let handler = handler.clone();
            set.spawn(async move {
                while let Some(item) = queue.next().await {
                    handler.handle(item).await;
                    queue.complete_one();
                }
            });
        }
        while set.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::item::RunHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl ItemHandler for CountingHandler {
        async fn handle(&self, _item: QueueItem) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn worker_pool_drains_every_enqueued_item() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(DiskQueue::new(dir.path()).unwrap());
        for i in 0..20 {
            queue
                .enqueue(QueueItem::JobTrace(RunHandle {
                    repo_full_name: "acme/widgets".into(),
                    run_id: i,
                    run_web_url: "https://example.invalid".into(),
                }))
                .unwrap();
        }

        let handler = Arc::new(CountingHandler { count: AtomicUsize::new(0) });
        let pool = WorkerPool::new(queue.clone(), 4);

        let queue_for_shutdown = queue.clone();
        let pool_handle = tokio::spawn(pool.run(handler.clone()));
        queue_for_shutdown.shutdown().await;
        pool_handle.await.unwrap();

        assert_eq!(handler.count.load(Ordering::SeqCst), 20);
    }
}
