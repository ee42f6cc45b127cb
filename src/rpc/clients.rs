//! Connection registry (§3 `Client`, §5 "clients + rate_limit_info guarded
//! by the Session Server's mutex").

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

/// An outbound handle to one connected client's socket write side.
pub type ClientSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<Uuid, ClientSender>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: Uuid, sender: ClientSender) {
        self.clients.lock().await.insert(id, sender);
    }

    pub async fn remove(&self, id: &Uuid) {
        self.clients.lock().await.remove(id);
    }

    pub async fn active_connections(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Broadcast a pre-serialized frame to every connected client. Snapshots
    /// handles under the lock, then sends without holding it (§9
    /// "Broadcasting to clients"); any send failure purges that client
    /// under a fresh lock acquisition.
    pub async fn broadcast(&self, frame: String) {
        let handles: Vec<(Uuid, ClientSender)> = {
            let guard = self.clients.lock().await;
            guard.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut failed = Vec::new();
        for (id, tx) in handles {
            if tx.send(frame.clone()).is_err() {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut guard = self.clients.lock().await;
            for id in failed {
                warn!(client = %id, "dropping client after failed notification send");
                guard.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_to_no_clients_is_a_no_op() {
        let registry = ClientRegistry::new();
        registry.broadcast("hello".to_string()).await;
        assert_eq!(registry.active_connections().await, 0);
    }

    #[tokio::test]
    async fn failed_send_purges_the_client() {
        let registry = ClientRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        registry.register(id, tx).await;
        drop(rx);

        registry.broadcast("hello".to_string()).await;
        assert_eq!(registry.active_connections().await, 0);
    }
}
