//! Cluster lifecycle notifications
//!
//! Drivers publish on a broadcast channel; subscribers that fall behind
//! lose the oldest events.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::entities::{ClusterId, OrganizationId};

/// Lifecycle event of a cluster
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    Deleted {
        cluster_id: ClusterId,
        organization_id: OrganizationId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// The delete workflow ended in failure; the record is kept
    DeletionFailed {
        cluster_id: ClusterId,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct ClusterEventBus {
    sender: broadcast::Sender<ClusterEvent>,
}

impl Default for ClusterEventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ClusterEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscriber is not an error
    pub fn publish(&self, event: ClusterEvent) {
        if self.sender.send(event).is_err() {
            debug!("No subscriber for cluster event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = ClusterEventBus::default();
        let mut receiver = bus.subscribe();
        let cluster_id = Uuid::new_v4();

        bus.publish(ClusterEvent::Deleted {
            cluster_id,
            organization_id: 7,
            name: "demo".into(),
            timestamp: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            ClusterEvent::Deleted { cluster_id: id, .. } => assert_eq!(id, cluster_id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = ClusterEventBus::new(4);
        bus.publish(ClusterEvent::DeletionFailed {
            cluster_id: Uuid::new_v4(),
            message: "boom".into(),
            timestamp: Utc::now(),
        });
    }
}
