//! Broadcast of project state changes to any number of listeners.

use crate::engine::RunOutcome;
use plater_common::{PlateIndex, SnapshotId};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    SnapshotTaken { id: SnapshotId, name: String },
    HistoryRestored { id: SnapshotId, name: String },
    DirtyChanged(bool),
    SessionEntered { name: String },
    SessionLeft { name: String, changed: bool },
    PlateSelected(PlateIndex),
    SlicingBegan { plate: PlateIndex },
    RefreshScene,
    RefreshPreview,
    SliceCompleted { plate: PlateIndex, outcome: RunOutcome },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProjectEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ProjectEvent) {
        // No listeners is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ProjectEvent::RefreshScene);
        assert_eq!(rx.try_recv().unwrap(), ProjectEvent::RefreshScene);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        bus.publish(ProjectEvent::DirtyChanged(true));
    }
}
