//! Delivery dispatcher: fans a freshly persisted message out to the
//! conversation's live connections and falls back to the push notifier when
//! the recipient is offline. The message is already durable by the time it
//! gets here, so every failure path is log-and-move-on.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use parley_db::Database;
use parley_types::api::PushNotification;
use parley_types::frames::{OutboundFrame, PointMetadata};
use parley_types::models::{Conversation, Message};

use crate::push::PushClient;
use crate::registry::{ConnectionHandle, Frame, Registry};

/// Attempts per live connection before giving up on the broadcast send.
const SEND_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: Registry,
    db: Arc<Database>,
    push: Option<PushClient>,
}

impl Dispatcher {
    pub fn new(registry: Registry, db: Arc<Database>, push: Option<PushClient>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner { registry, db, push }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Broadcast `message` to everyone live in the conversation, then push to
    /// the recipient's device if they have no live connection.
    pub async fn dispatch(
        &self,
        conversation: &Conversation,
        sender_username: &str,
        message: Message,
        metadata: PointMetadata,
    ) {
        let sender_id = message.sender_id;
        let text = message.text.clone();
        let frame = OutboundFrame { message, metadata };
        let payload = match serde_json::to_vec(&frame) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!("Failed to serialize broadcast frame: {}", e);
                return;
            }
        };

        for handle in self.inner.registry.all_live(conversation.id).await {
            send_with_retry(&handle, conversation.id, &payload);
        }

        let recipient = conversation.other_participant(sender_id);
        if self.inner.registry.is_live(conversation.id, recipient).await {
            // Recipient saw the broadcast; a concurrent close here only costs
            // a missed push, tolerated rather than prevented
            return;
        }

        let Some(push) = &self.inner.push else {
            debug!("No push notifier configured, message {} stays fetch-only", frame.message.id);
            return;
        };

        let db = self.inner.db.clone();
        let token = match tokio::task::spawn_blocking(move || db.get_device_token(recipient)).await
        {
            Ok(Ok(token)) => token,
            Ok(Err(e)) => {
                warn!("Device token lookup failed for user {}: {}", recipient, e);
                return;
            }
            Err(e) => {
                warn!("Device token lookup join error: {}", e);
                return;
            }
        };
        let Some(device_token) = token else {
            debug!("User {} has no registered device, skipping push", recipient);
            return;
        };

        let note = PushNotification {
            device_token,
            user_id: recipient,
            conversation_id: conversation.id,
            from_username: sender_username.to_string(),
            text,
        };
        let push = push.clone();
        tokio::spawn(async move {
            if let Err(e) = push.notify(&note).await {
                warn!("Push notification for user {} failed: {}", note.user_id, e);
            }
        });
    }
}

/// Bounded retry on the send step only; the message is already persisted, so
/// giving up means the recipient catches up on their next history fetch.
fn send_with_retry(handle: &ConnectionHandle, conversation_id: i64, payload: &Bytes) {
    for _ in 0..SEND_ATTEMPTS {
        if handle.send(Frame::Payload(payload.clone())).is_ok() {
            return;
        }
    }
    warn!(
        "Giving up on broadcast to connection {} in conversation {} after {} attempts",
        handle.conn_id(),
        conversation_id,
        SEND_ATTEMPTS
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_types::frames::InboundFrame;

    fn test_conversation() -> Conversation {
        Conversation {
            id: 1,
            user_low: 10,
            user_high: 20,
            blocked_by: None,
            created_at: Utc::now(),
        }
    }

    fn test_message(id: i64, sender_id: i64) -> Message {
        Message {
            id,
            text: "hello".into(),
            sender_id,
            is_read: false,
            created_at: Utc::now(),
            edited_at: None,
        }
    }

    fn test_dispatcher(registry: Registry) -> Dispatcher {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Dispatcher::new(registry, db, None)
    }

    #[tokio::test]
    async fn dispatch_reaches_every_live_connection() {
        let registry = Registry::new();
        let (sender_handle, mut sender_rx) = ConnectionHandle::new();
        let (recipient_handle, mut recipient_rx) = ConnectionHandle::new();
        registry.register(1, 10, sender_handle).await;
        registry.register(1, 20, recipient_handle).await;

        let dispatcher = test_dispatcher(registry);
        let conv = test_conversation();
        dispatcher
            .dispatch(&conv, "alice", test_message(42, 10), PointMetadata {
                previous_id: Some(41),
            })
            .await;

        for rx in [&mut sender_rx, &mut recipient_rx] {
            let Some(Frame::Payload(bytes)) = rx.recv().await else {
                panic!("expected a payload frame");
            };
            let frame: OutboundFrame = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(frame.message.id, 42);
            assert_eq!(frame.message.sender_id, 10);
            assert_eq!(frame.metadata.previous_id, Some(41));
        }
    }

    #[tokio::test]
    async fn dispatch_survives_dead_connection() {
        let registry = Registry::new();
        let (dead, rx) = ConnectionHandle::new();
        drop(rx); // writer task already gone
        registry.register(1, 20, dead).await;

        let dispatcher = test_dispatcher(registry);
        let conv = test_conversation();

        // Exhausts the retry budget and moves on without panicking
        dispatcher
            .dispatch(&conv, "alice", test_message(1, 10), PointMetadata {
                previous_id: None,
            })
            .await;
    }

    #[tokio::test]
    async fn broadcast_payload_is_not_a_valid_inbound_frame() {
        // Guards against a client echoing our broadcast back verbatim and it
        // accidentally parsing as a send
        let frame = OutboundFrame {
            message: test_message(1, 10),
            metadata: PointMetadata { previous_id: None },
        };
        let bytes = serde_json::to_vec(&frame).unwrap();
        assert!(serde_json::from_slice::<InboundFrame>(&bytes).is_err());
    }
}
