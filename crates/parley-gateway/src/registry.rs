//! Registry of live connections, keyed by (conversation, participant).
//! At most one connection per key; a new registration evicts the previous one.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// What a connection's writer task is asked to do next.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Serialized broadcast payload, sent as one binary WebSocket message.
    Payload(Bytes),
    /// Close the socket with the given reason, then stop.
    Close(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection registered for the same (conversation, participant).
    Superseded,
    /// The peer sent a text frame or an undecodable binary frame.
    UnacceptableData,
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            // Application-defined close code; 1003 is the RFC 6455 code for
            // data the endpoint cannot accept.
            CloseReason::Superseded => 4000,
            CloseReason::UnacceptableData => 1003,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Superseded => "superseded",
            CloseReason::UnacceptableData => "unacceptable data",
        }
    }
}

/// Handle to one live socket: an identity token plus the channel feeding the
/// socket's writer task. Removal is guarded by the identity token so a stale
/// close never evicts a successor.
#[derive(Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<Frame>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue a frame for the writer task. Fails once the writer has stopped.
    pub fn send(&self, frame: Frame) -> Result<(), mpsc::error::SendError<Frame>> {
        self.tx.send(frame)
    }
}

/// Concurrency-safe map (conversation, participant) -> live connection.
/// One write lock guards the whole key space; with two participants per
/// conversation there is nothing finer worth sharding.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<i64, HashMap<i64, ConnectionHandle>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` under the key, returning the evicted previous handle if
    /// one existed so the caller can close it as superseded. Atomic: two
    /// concurrent registrations for the same key serialize on the write lock
    /// and exactly one sees the other as its eviction.
    pub async fn register(
        &self,
        conversation_id: i64,
        user_id: i64,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        self.inner
            .write()
            .await
            .entry(conversation_id)
            .or_default()
            .insert(user_id, handle)
    }

    /// Identity-checked, idempotent removal: only removes the entry if the
    /// stored handle is still the one identified by `conn_id`.
    pub async fn remove(&self, conversation_id: i64, user_id: i64, conn_id: Uuid) {
        let mut map = self.inner.write().await;
        let Some(participants) = map.get_mut(&conversation_id) else {
            return;
        };
        if participants
            .get(&user_id)
            .is_some_and(|h| h.conn_id == conn_id)
        {
            participants.remove(&user_id);
        }
        if participants.is_empty() {
            map.remove(&conversation_id);
        }
    }

    /// Every live connection for the conversation (0, 1, or 2).
    pub async fn all_live(&self, conversation_id: i64) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .get(&conversation_id)
            .map(|participants| participants.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_live(&self, conversation_id: i64, user_id: i64) -> bool {
        self.inner
            .read()
            .await
            .get(&conversation_id)
            .is_some_and(|participants| participants.contains_key(&user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_evicts_previous_connection() {
        let registry = Registry::new();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();
        let first_id = first.conn_id();
        let second_id = second.conn_id();

        assert!(registry.register(1, 10, first).await.is_none());
        let evicted = registry.register(1, 10, second).await.unwrap();
        assert_eq!(evicted.conn_id(), first_id);

        let live = registry.all_live(1).await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].conn_id(), second_id);
    }

    #[tokio::test]
    async fn stale_remove_never_evicts_successor() {
        let registry = Registry::new();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();
        let first_id = first.conn_id();

        registry.register(1, 10, first).await;
        registry.register(1, 10, second).await;

        // The evicted connection's delayed close fires after its replacement
        registry.remove(1, 10, first_id).await;
        assert!(registry.is_live(1, 10).await);

        // Removing twice with the stale id stays a no-op
        registry.remove(1, 10, first_id).await;
        assert_eq!(registry.all_live(1).await.len(), 1);
    }

    #[tokio::test]
    async fn remove_with_current_identity_clears_entry() {
        let registry = Registry::new();
        let (handle, _rx) = ConnectionHandle::new();
        let conn_id = handle.conn_id();

        registry.register(1, 10, handle).await;
        registry.remove(1, 10, conn_id).await;

        assert!(!registry.is_live(1, 10).await);
        assert!(registry.all_live(1).await.is_empty());
    }

    #[tokio::test]
    async fn all_live_tracks_both_participants() {
        let registry = Registry::new();
        let (a, _rx1) = ConnectionHandle::new();
        let (b, _rx2) = ConnectionHandle::new();

        registry.register(1, 10, a).await;
        registry.register(1, 20, b).await;

        assert_eq!(registry.all_live(1).await.len(), 2);
        assert!(registry.all_live(2).await.is_empty());
        assert!(registry.is_live(1, 10).await);
        assert!(!registry.is_live(1, 30).await);
    }
}
