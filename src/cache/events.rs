//! Cross-context change notifications.
//!
//! Engines that share persistent backends publish every write, delete and
//! clear on a broadcast channel. Delivery is best-effort and unordered
//! across contexts: a lagging receiver drops events. Receivers only log
//! what they see; nothing is synchronized through this feed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::entry::Tier;

/// Buffered events per receiver before the oldest are dropped.
pub const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Set,
    Delete,
    Clear,
}

/// One change made by some context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Context that made the change.
    pub origin: Uuid,
    pub tier: Tier,
    /// `None` for a whole-tier clear.
    pub key: Option<String>,
    pub kind: ChangeKind,
}

/// Sending half of the change feed. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Having no receivers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Log events made by other contexts until the feed closes.
pub fn spawn_change_logger(
    mut receiver: broadcast::Receiver<ChangeEvent>,
    own_origin: Uuid,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) if event.origin != own_origin => {
                    debug!(
                        origin = %event.origin,
                        tier = %event.tier,
                        key = event.key.as_deref().unwrap_or("*"),
                        kind = ?event.kind,
                        "Storage changed in another context"
                    );
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change feed lagged; notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let feed = ChangeFeed::new();
        let mut a = feed.subscribe();
        let mut b = feed.clone().subscribe();

        let event = ChangeEvent {
            origin: Uuid::new_v4(),
            tier: Tier::DurableSessionScoped,
            key: Some("timetable".into()),
            kind: ChangeKind::Set,
        };
        feed.publish(event.clone());

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_receivers() {
        ChangeFeed::new().publish(ChangeEvent {
            origin: Uuid::nil(),
            tier: Tier::TransactionalIndexed,
            key: None,
            kind: ChangeKind::Clear,
        });
    }

    #[tokio::test]
    async fn test_logger_stops_when_feed_closes() {
        let feed = ChangeFeed::new();
        let handle = spawn_change_logger(feed.subscribe(), Uuid::new_v4());
        feed.publish(ChangeEvent {
            origin: Uuid::new_v4(),
            tier: Tier::DurablePageScoped,
            key: Some("news".into()),
            kind: ChangeKind::Delete,
        });
        drop(feed);
        handle.await.unwrap();
    }
}
