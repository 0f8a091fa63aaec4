use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;
use wager_models::Notification;

/// Registry of connected users' push channels.
///
/// Constructed once in `run_server` and shared by `Arc`. The transport that
/// drains each receiver (websocket, SSE) sits outside this crate.
#[derive(Default)]
pub struct NotificationHub {
    connections: DashMap<Uuid, mpsc::UnboundedSender<Notification>>,
}

impl NotificationHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one for the same user.
    pub fn connect(&self, user_id: Uuid) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.connections.insert(user_id, tx).is_some() {
            info!(%user_id, "Replaced existing notification connection");
        }
        rx
    }

    pub fn disconnect(&self, user_id: Uuid) {
        self.connections.remove(&user_id);
    }

    #[must_use]
    pub fn is_connected(&self, user_id: Uuid) -> bool {
        self.connections.contains_key(&user_id)
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// Push to one user. Returns `false` if the user is not connected; a
    /// closed channel is dropped from the registry.
    pub fn publish(&self, user_id: Uuid, notification: Notification) -> bool {
        let delivered = match self.connections.get(&user_id) {
            Some(sender) => sender.send(notification).is_ok(),
            None => return false,
        };

        if !delivered {
            debug!(%user_id, "Dropping closed notification channel");
            self.connections
                .remove_if(&user_id, |_, sender| sender.is_closed());
        }
        delivered
    }
}
