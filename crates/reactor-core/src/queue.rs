//! The durable-in-process work queue webhook handlers enqueue onto and the
//! background worker pool drains (§5 "the queue is the buffer"). Webhook
//! handlers never execute workflow nodes; they persist state and call
//! [`RunQueue::enqueue`], which returns fast. A bounded channel gives the
//! ingest path real backpressure: a full queue means `enqueue` returns
//! `Err(QueueFull)`, which the HTTP layer turns into `503 Retry-After`
//! (§5 "If the queue is full -> 503 with Retry-After, rare by design").

use reactor_types::RunId;
use tokio::sync::{mpsc, Mutex};

/// Where the Workflow Driver should resume a queued Run. The driver itself
/// only knows "drive from `current_node`"; this just picks which driver
/// entrypoint the worker calls, since resuming after an approved validation
/// needs a CAS the plain `drive` entrypoint doesn't do on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEntryPoint {
    /// A brand-new or reactivated Run: start at `current_node` as stored
    /// (`None` means `prepare`).
    FromStart,
    /// An approved `ValidationRequest`: resume at `merge`.
    FromMerge,
}

#[derive(Debug, Clone, Copy)]
pub struct QueuedRun {
    pub run_id: RunId,
    pub entry: RunEntryPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run queue is at capacity")]
pub struct QueueFull;

/// Cheaply cloneable; every clone shares the same bounded channel. The
/// receiver is wrapped in a `Mutex` so any number of worker tasks can share
/// one `RunQueue` and race to dequeue, matching a multi-worker pool
/// consuming one durable queue (§5).
#[derive(Clone)]
pub struct RunQueue {
    sender: mpsc::Sender<QueuedRun>,
    receiver: std::sync::Arc<Mutex<mpsc::Receiver<QueuedRun>>>,
}

impl RunQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: std::sync::Arc::new(Mutex::new(receiver)),
        }
    }

    pub fn enqueue(&self, run_id: RunId, entry: RunEntryPoint) -> Result<(), QueueFull> {
        self.sender.try_send(QueuedRun { run_id, entry }).map_err(|_| QueueFull)
    }

    /// Blocks until a Run is available or every sender has been dropped.
    pub async fn dequeue(&self) -> Option<QueuedRun> {
        self.receiver.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let queue = RunQueue::new(4);
        queue.enqueue(RunId(1), RunEntryPoint::FromStart).unwrap();
        let item = queue.dequeue().await.unwrap();
        assert_eq!(item.run_id, RunId(1));
        assert_eq!(item.entry, RunEntryPoint::FromStart);
    }

    #[tokio::test]
    async fn full_queue_rejects_enqueue() {
        let queue = RunQueue::new(1);
        queue.enqueue(RunId(1), RunEntryPoint::FromStart).unwrap();
        assert_eq!(queue.enqueue(RunId(2), RunEntryPoint::FromStart), Err(QueueFull));
    }

    #[tokio::test]
    async fn multiple_workers_can_share_one_queue() {
        let queue = RunQueue::new(4);
        queue.enqueue(RunId(1), RunEntryPoint::FromStart).unwrap();
        queue.enqueue(RunId(2), RunEntryPoint::FromMerge).unwrap();
        let worker_a = queue.clone();
        let worker_b = queue.clone();
        let first = worker_a.dequeue().await.unwrap();
        let second = worker_b.dequeue().await.unwrap();
        let mut ids = vec![first.run_id.0, second.run_id.0];
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }
}
