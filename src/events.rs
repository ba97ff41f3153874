use tokio::sync::broadcast;
use tracing::debug;

use crate::models::ProgressEvent;

/// Publish-only sink for progress events. Delivery is at most once; events
/// for one job reach a subscriber in publish order.
pub trait ProgressChannel: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

pub struct ProgressBroadcaster {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressChannel for ProgressBroadcaster {
    fn publish(&self, event: ProgressEvent) {
        debug!(job_id = %event.job_id, status = %event.status, "📣 {}", event.progress);
        if self.sender.send(event).is_err() {
            debug!("no progress subscribers, event dropped");
        }
    }
}
