use crate::collectors::system::SystemSnapshot;
use crate::model::{LogEntry, StatusSnapshot};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct Bus {
    status: broadcast::Sender<Arc<StatusSnapshot>>,
    entries: broadcast::Sender<Arc<LogEntry>>,
    system: broadcast::Sender<Arc<SystemSnapshot>>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (status, _) = broadcast::channel(capacity);
        let (entries, _) = broadcast::channel(capacity);
        let (system, _) = broadcast::channel(capacity);
        Self {
            status,
            entries,
            system,
        }
    }

    pub fn publish_status(&self, snapshot: Arc<StatusSnapshot>) {
        let _ = self.status.send(snapshot);
    }

    pub fn publish_entry(&self, entry: Arc<LogEntry>) {
        let _ = self.entries.send(entry);
    }

    pub fn publish_system(&self, snapshot: Arc<SystemSnapshot>) {
        let _ = self.system.send(snapshot);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<Arc<StatusSnapshot>> {
        self.status.subscribe()
    }

    pub fn subscribe_entries(&self) -> broadcast::Receiver<Arc<LogEntry>> {
        self.entries.subscribe()
    }

    pub fn subscribe_system(&self) -> broadcast::Receiver<Arc<SystemSnapshot>> {
        self.system.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusSnapshot;

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = Bus::new(4);
        bus.publish_status(Arc::new(StatusSnapshot::baseline()));

        let mut rx = bus.subscribe_status();
        let snap = Arc::new(StatusSnapshot::baseline());
        bus.publish_status(snap.clone());
        assert!(Arc::ptr_eq(&rx.recv().await.unwrap(), &snap));
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_newest() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe_status();
        for _ in 0..5 {
            bus.publish_status(Arc::new(StatusSnapshot::baseline()));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
