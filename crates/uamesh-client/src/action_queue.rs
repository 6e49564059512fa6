//! Single-consumer FIFO action queues
//!
//! One worker task per queue pulls closures and runs them to completion,
//! in submission order. Two queues keep the stack responsive: protocol
//! work runs on one, user callbacks on another, so a slow callback can
//! never block protocol progress. Stop is a sentinel item followed by a
//! join.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use uamesh_core::status::{Result, Status};

/// Unit of work executed by a queue worker
pub type Action = Box<dyn FnOnce() + Send + 'static>;

enum QueueItem {
    Run { label: &'static str, action: Action },
    Stop,
}

/// Submission handle; clones feed the same worker
#[derive(Clone)]
pub struct ActionQueue {
    tx: mpsc::Sender<QueueItem>,
}

impl ActionQueue {
    /// Enqueue, waiting while the queue is full
    pub async fn post(&self, label: &'static str, action: Action) -> Result<()> {
        self.tx
            .send(QueueItem::Run { label, action })
            .await
            .map_err(|_| Status::Closed)
    }

    /// Enqueue without waiting; a full queue is `WouldBlock`
    pub fn try_post(&self, label: &'static str, action: Action) -> Result<()> {
        self.tx
            .try_send(QueueItem::Run { label, action })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => Status::WouldBlock,
                mpsc::error::TrySendError::Closed(_) => Status::Closed,
            })
    }
}

/// Owns the worker task of one queue
pub struct ActionQueueManager {
    name: &'static str,
    queue: ActionQueue,
    worker: JoinHandle<()>,
}

impl ActionQueueManager {
    /// Spawn the worker; `capacity` bounds the backlog
    pub fn start(name: &'static str, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    QueueItem::Run { label, action } => {
                        trace!(queue = name, label, "action");
                        action();
                    }
                    QueueItem::Stop => break,
                }
            }
            debug!(queue = name, "action queue worker stopped");
        });
        Self {
            name,
            queue: ActionQueue { tx },
            worker,
        }
    }

    pub fn queue(&self) -> ActionQueue {
        self.queue.clone()
    }

    /// Request-and-wait stop: enqueue the sentinel, then join the worker.
    /// Actions already queued before the sentinel still run.
    pub async fn stop(self) {
        debug!(queue = self.name, "stopping action queue");
        let _ = self.queue.tx.send(QueueItem::Stop).await;
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn actions_run_in_fifo_order() {
        let manager = ActionQueueManager::start("test", 16);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let order = order.clone();
            manager
                .queue()
                .post("record", Box::new(move || order.lock().unwrap().push(i)))
                .await
                .unwrap();
        }
        manager.stop().await;
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stop_drains_prior_actions() {
        let manager = ActionQueueManager::start("test", 16);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let ran = ran.clone();
            manager
                .queue()
                .post(
                    "bump",
                    Box::new(move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .await
                .unwrap();
        }
        manager.stop().await;
        assert_eq!(ran.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn try_post_reports_full_queue() {
        let manager = ActionQueueManager::start("test", 1);
        let queue = manager.queue();
        // Block the worker so the buffer stays occupied
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        queue
            .post(
                "block",
                Box::new(move || {
                    let _ = gate_rx.recv();
                }),
            )
            .await
            .unwrap();

        // Fill the single buffered slot, then observe WouldBlock
        let mut saw_would_block = false;
        for _ in 0..3 {
            match queue.try_post("noop", Box::new(|| {})) {
                Err(Status::WouldBlock) => {
                    saw_would_block = true;
                    break;
                }
                Ok(()) => continue,
                Err(other) => panic!("unexpected status {other:?}"),
            }
        }
        assert!(saw_would_block);
        gate_tx.send(()).unwrap();
        manager.stop().await;
    }

    #[tokio::test]
    async fn post_after_stop_is_closed() {
        let manager = ActionQueueManager::start("test", 4);
        let queue = manager.queue();
        manager.stop().await;
        assert_eq!(
            queue.post("late", Box::new(|| {})).await,
            Err(Status::Closed)
        );
    }
}
