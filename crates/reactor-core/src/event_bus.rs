//! Process-wide fan-out of `WorkflowEvent`s for observability and the
//! read-only admin surface. A thin wrapper over `tokio::sync::broadcast`.

use reactor_types::WorkflowEvent;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishing never blocks on slow subscribers: a lagging receiver just
    /// misses old events (`broadcast::error::RecvError::Lagged`), it never
    /// backs up the publisher — the publisher is always a workflow step
    /// transition and must not stall on observability.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_types::{RunId, TaskId};

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::RunCreated {
            task_id: TaskId(1),
            run_id: RunId(1),
            run_number: 1,
            is_reactivation: false,
            at: chrono::Utc::now(),
        });
        let received = rx.recv().await.unwrap();
        matches!(received, WorkflowEvent::RunCreated { .. });
    }
}
