//! C5 — Scan Queue disk backing store.
//!
//! A segmented on-disk queue: an in-memory write buffer is flushed to a
//! new segment file either when it crosses a size/count threshold or on
//! a fixed interval, and consumers read segments back in FIFO order.
//! Follows the atomic-write idiom of a content-addressed disk store —
//! write to a temp file in the same directory, then rename into place —
//! so a crash mid-flush never leaves a half-written segment visible to
//! a reader.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{CredsweepError, Result};
use crate::queue::item::QueueItem;

const SEGMENT_BYTES_CAP: usize = 512 * 1024;
const SEGMENT_MESSAGE_CAP: usize = 2500;
const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueStatus {
    pub received: u64,
    pub pending: i64,
}

struct Inner {
    write_buffer: VecDeque<QueueItem>,
    write_buffer_bytes: usize,
    segments: VecDeque<PathBuf>,
    read_buffer: VecDeque<QueueItem>,
    next_segment_id: u64,
}

/// Bounded disk-backed work queue. One instance per scan; its directory
/// is unlinked on clean shutdown.
pub struct DiskQueue {
    dir: PathBuf,
    inner: Mutex<Inner>,
    notify: Notify,
    received: AtomicU64,
    pending: AtomicI64,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl DiskQueue {
    /// Creates a fresh, uniquely-named directory under `base_dir` for
    /// this queue's segment files.
    pub fn new(base_dir: &std::path::Path) -> Result<Self> {
        let dir = base_dir.join(format!("credsweep-queue-{}-{}", std::process::id(), rand::random::<u64>()));
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            inner: Mutex::new(Inner {
                write_buffer: VecDeque::new(),
                write_buffer_bytes: 0,
                segments: VecDeque::new(),
                read_buffer: VecDeque::new(),
                next_segment_id: 0,
            }),
            notify: Notify::new(),
            received: AtomicU64::new(0),
            pending: AtomicI64::new(0),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            received: self.received.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }

    /// Enqueues one item, flushing the write buffer to a segment file if
    /// it has crossed its size or message-count threshold. Increments
    /// the producer's WaitGroup; a matching `complete_one` is required
    /// once the item has been fully processed.
    pub fn enqueue(&self, item: QueueItem) -> Result<()> {
        let encoded = serde_json::to_vec(&item)
            .map_err(|e| CredsweepError::Io(std::io::Error::other(e)))?;
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.write_buffer_bytes += encoded.len() + 1;
        inner.write_buffer.push_back(item);
        self.received.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::Relaxed);

        if inner.write_buffer.len() >= SEGMENT_MESSAGE_CAP || inner.write_buffer_bytes >= SEGMENT_BYTES_CAP {
            self.flush_locked(&mut inner)?;
        }
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Flushes the current write buffer to a new segment file,
    /// regardless of size — called on the periodic flush tick and at
    /// shutdown.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.write_buffer.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(inner.write_buffer_bytes);
        for item in inner.write_buffer.drain(..) {
            serde_json::to_writer(&mut buf, &item).map_err(|e| CredsweepError::Io(std::io::Error::other(e)))?;
            buf.push(b'\n');
        }
        inner.write_buffer_bytes = 0;

        let segment_path = self.dir.join(format!("segment-{:010}.jsonl", inner.next_segment_id));
        inner.next_segment_id += 1;

        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::fs::write(tmp.path(), &buf)?;
        tmp.persist(&segment_path).map_err(|e| CredsweepError::Io(e.error))?;

        inner.segments.push_back(segment_path);
        Ok(())
    }

    /// Waits for and returns the next item, or `None` once the queue is
    /// shutting down and fully drained. Reads a whole segment's worth
    /// of items at a time, deleting the segment once consumed.
    pub async fn next(&self) -> Option<QueueItem> {
        loop {
            {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                if let Some(item) = inner.read_buffer.pop_front() {
                    return Some(item);
                }
                if let Some(segment_path) = inner.segments.pop_front() {
                    match std::fs::read_to_string(&segment_path) {
                        Ok(contents) => {
                            for line in contents.lines().filter(|l| !l.is_empty()) {
                                match serde_json::from_str::<QueueItem>(line) {
                                    Ok(item) => inner.read_buffer.push_back(item),
                                    Err(e) => warn!(error = %e, "dropping unparsable queue segment line"),
                                }
                            }
                        }
                        Err(e) => warn!(segment = ?segment_path, error = %e, "failed to read queue segment"),
                    }
                    let _ = std::fs::remove_file(&segment_path);
                    continue;
                }
                let shutting_down = self.shutting_down.load(Ordering::Acquire);
                if !inner.write_buffer.is_empty() && shutting_down {
                    self.flush_locked(&mut inner).ok();
                    continue;
                }
                if shutting_down && inner.write_buffer.is_empty() {
                    return None;
                }
            }
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(FLUSH_INTERVAL) => {}
            }
        }
    }

    /// Marks one previously-dequeued item as fully processed, decrementing
    /// the producer's WaitGroup and waking `wait_until_drained`.
    pub fn complete_one(&self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Starts the periodic flush ticker; the returned handle should be
    /// aborted once the queue shuts down.
    pub fn spawn_flush_task(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = queue.flush() {
                    warn!(error = %e, "periodic queue flush failed");
                }
            }
        })
    }

    /// Stops accepting the assumption of further enqueues, flushes any
    /// remaining buffered items, waits for the WaitGroup to drain, then
    /// removes the queue directory.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.flush();
        self.notify.notify_waiters();

        while self.pending.load(Ordering::Relaxed) > 0 {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
            }
        }

        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            debug!(dir = ?self.dir, error = %e, "failed to remove queue directory on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::item::RunHandle;

    fn sample_item(id: u64) -> QueueItem {
        QueueItem::JobTrace(RunHandle {
            repo_full_name: "acme/widgets".into(),
            run_id: id,
            run_web_url: format!("https://example.invalid/acme/widgets/-/pipelines/{id}"),
        })
    }

    #[tokio::test]
    async fn enqueue_and_next_preserve_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::new(dir.path()).unwrap();
        for i in 0..5 {
            queue.enqueue(sample_item(i)).unwrap();
        }
        queue.flush().unwrap();

        for i in 0..5 {
            let item = queue.next().await.unwrap();
            match item {
                QueueItem::JobTrace(run) => assert_eq!(run.run_id, i),
                _ => panic!("expected JobTrace"),
            }
            queue.complete_one();
        }
        assert_eq!(queue.status().pending, 0);
    }

    #[tokio::test]
    async fn status_tracks_received_and_pending() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::new(dir.path()).unwrap();
        queue.enqueue(sample_item(1)).unwrap();
        queue.enqueue(sample_item(2)).unwrap();
        let status = queue.status();
        assert_eq!(status.received, 2);
        assert_eq!(status.pending, 2);
    }

    #[tokio::test]
    async fn shutdown_drains_and_removes_queue_directory() {
        let dir = tempfile::tempdir().unwrap();
        let queue = std::sync::Arc::new(DiskQueue::new(dir.path()).unwrap());
        queue.enqueue(sample_item(1)).unwrap();

        let queue_for_worker = queue.clone();
        let worker = tokio::spawn(async move {
            if let Some(_item) = queue_for_worker.next().await {
                queue_for_worker.complete_one();
            }
        });

        queue.shutdown().await;
        worker.await.unwrap();
        assert!(!queue.dir.exists());
    }

    #[test]
    fn large_batch_forces_segment_flush() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DiskQueue::new(dir.path()).unwrap();
        for i in 0..(SEGMENT_MESSAGE_CAP + 10) {
            queue.enqueue(sample_item(i as u64)).unwrap();
        }
        let inner = queue.inner.lock().unwrap();
        assert!(!inner.segments.is_empty());
    }
}
