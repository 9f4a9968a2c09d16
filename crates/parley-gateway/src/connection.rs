//! Per-connection gateway loop.
//!
//! Lifecycle: Connecting -> Authorizing -> Open -> Closing -> Closed.
//! Authorization (conversation exists, requester participates, not blocked)
//! happens at the HTTP upgrade layer before `serve` is called, so a rejected
//! client never opens a socket. `serve` owns the Open state: it registers the
//! connection, evicts and closes any predecessor as superseded, then pumps
//! frames until either side closes.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use parley_db::Database;
use parley_types::frames::InboundFrame;
use parley_types::models::Conversation;

use crate::dispatcher::Dispatcher;
use crate::registry::{CloseReason, ConnectionHandle, Frame, Registry};

pub async fn serve(
    socket: WebSocket,
    registry: Registry,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    conversation: Conversation,
    user_id: i64,
    username: String,
) {
    let (sink, mut stream) = socket.split();

    let (handle, mut rx) = ConnectionHandle::new();
    let conn_id = handle.conn_id();

    take_over_slot(&registry, conversation.id, user_id, handle.clone(), &username).await;

    info!(
        "{} ({}) connected to conversation {}",
        username, user_id, conversation.id
    );

    // Writer task: drains the handle's channel into the socket. Ends after
    // a Close frame tells the peer why, or once every sender is gone.
    let mut send_task = tokio::spawn(pump_writer(rx, sink));

    // Reader task: the channel is binary-only; anything else is a protocol
    // violation that closes the socket.
    let recv_registry = registry.clone();
    let recv_conversation = conversation.clone();
    let recv_username = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Binary(data) => {
                    let frame = match serde_json::from_slice::<InboundFrame>(&data) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(
                                "{} ({}) sent an undecodable frame on conversation {}: {}",
                                recv_username, user_id, recv_conversation.id, e
                            );
                            close_for_violation(
                                &recv_registry,
                                &handle,
                                recv_conversation.id,
                                user_id,
                            )
                            .await;
                            break;
                        }
                    };

                    handle_frame(&dispatcher, &db, &recv_conversation, user_id, &recv_username, frame)
                        .await;
                }
                Message::Text(_) => {
                    warn!(
                        "{} ({}) sent a text frame on binary-only conversation {}",
                        recv_username, user_id, recv_conversation.id
                    );
                    close_for_violation(&recv_registry, &handle, recv_conversation.id, user_id)
                        .await;
                    break;
                }
                Message::Close(_) => break,
                // Pings are answered by axum; pongs carry no state here
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        // Writer stopped first: the socket is dead or the peer was told to
        // close, so nothing the reader produces can be delivered
        _ = &mut send_task => {
            recv_task.abort();
            registry.remove(conversation.id, user_id, conn_id).await;
        }
        // Reader stopped first: remove the registry entry (identity-checked,
        // so a successor stays untouched) and let the writer drain whatever
        // is queued. With the reader's handle and the registry's clone both
        // gone the channel closes, so the writer always terminates and a
        // queued close frame reaches the peer instead of being aborted away.
        _ = &mut recv_task => {
            registry.remove(conversation.id, user_id, conn_id).await;
            let _ = send_task.await;
        }
    }

    info!(
        "{} ({}) disconnected from conversation {}",
        username, user_id, conversation.id
    );
}

/// Persist a well-formed frame, compute its point metadata, and hand both to
/// the dispatcher. A persistence failure is terminal for this message: it is
/// logged and nothing is broadcast or pushed.
async fn handle_frame(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    conversation: &Conversation,
    sender_id: i64,
    sender_username: &str,
    frame: InboundFrame,
) {
    let persist_db = db.clone();
    let conversation_id = conversation.id;
    let result = tokio::task::spawn_blocking(move || {
        let row = persist_db.insert_message(conversation_id, sender_id, &frame.text)?;
        let metadata = persist_db.point_metadata(conversation_id, row.id)?;
        Ok::<_, anyhow::Error>((row, metadata))
    })
    .await;

    let (row, metadata) = match result {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            error!(
                "Failed to persist message from {} in conversation {}: {}",
                sender_id, conversation_id, e
            );
            return;
        }
        Err(e) => {
            error!("Message persistence join error: {}", e);
            return;
        }
    };

    dispatcher
        .dispatch(conversation, sender_username, row.into_model(), metadata)
        .await;
}

/// Forward queued frames into the socket. Terminates after writing a close
/// frame, on a failed send, or once the channel has no senders left; the
/// caller awaits this rather than aborting it so a queued close reason is
/// never dropped on the floor.
async fn pump_writer<S>(mut rx: mpsc::UnboundedReceiver<Frame>, mut sink: S)
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Payload(bytes) => {
                if sink.send(Message::Binary(bytes)).await.is_err() {
                    break;
                }
            }
            Frame::Close(reason) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: reason.code(),
                        reason: reason.as_str().into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

/// Atomic takeover of the (conversation, participant) slot; the previous
/// connection, if any, is told to close as superseded before the new one
/// starts serving.
async fn take_over_slot(
    registry: &Registry,
    conversation_id: i64,
    user_id: i64,
    handle: ConnectionHandle,
    username: &str,
) {
    if let Some(evicted) = registry.register(conversation_id, user_id, handle).await {
        info!(
            "{} ({}) superseded connection {} in conversation {}",
            username,
            user_id,
            evicted.conn_id(),
            conversation_id
        );
        let _ = evicted.send(Frame::Close(CloseReason::Superseded));
    }
}

async fn close_for_violation(
    registry: &Registry,
    handle: &ConnectionHandle,
    conversation_id: i64,
    user_id: i64,
) {
    let _ = handle.send(Frame::Close(CloseReason::UnacceptableData));
    registry
        .remove(conversation_id, user_id, handle.conn_id())
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Sink that records every written message, standing in for the socket.
    #[derive(Default)]
    struct RecordingSink {
        written: Vec<Message>,
    }

    impl Sink<Message> for RecordingSink {
        type Error = ();

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), ()>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), ()> {
            self.written.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), ()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), ()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn writer_delivers_queued_close_reason_before_stopping() {
        let (handle, rx) = ConnectionHandle::new();
        handle.send(Frame::Payload(Bytes::from_static(b"{}"))).unwrap();
        handle
            .send(Frame::Close(CloseReason::UnacceptableData))
            .unwrap();

        // Terminates on the close frame even though a sender is still alive
        let mut sink = RecordingSink::default();
        pump_writer(rx, &mut sink).await;

        assert_eq!(sink.written.len(), 2);
        assert!(matches!(sink.written[0], Message::Binary(_)));
        let Message::Close(Some(frame)) = &sink.written[1] else {
            panic!("expected a close frame with a reason");
        };
        assert_eq!(frame.code, CloseReason::UnacceptableData.code());
        assert_eq!(frame.reason.as_str(), "unacceptable data");
    }

    #[tokio::test]
    async fn writer_stops_once_all_senders_are_gone() {
        let (handle, rx) = ConnectionHandle::new();
        handle.send(Frame::Payload(Bytes::from_static(b"{}"))).unwrap();
        drop(handle);

        let mut sink = RecordingSink::default();
        pump_writer(rx, &mut sink).await;

        assert_eq!(sink.written.len(), 1);
    }

    #[tokio::test]
    async fn takeover_closes_predecessor_as_superseded() {
        let registry = Registry::new();
        let (first, mut first_rx) = ConnectionHandle::new();
        let (second, _rx) = ConnectionHandle::new();

        take_over_slot(&registry, 1, 10, first, "alice").await;
        take_over_slot(&registry, 1, 10, second.clone(), "alice").await;

        let Some(Frame::Close(reason)) = first_rx.recv().await else {
            panic!("expected a close frame");
        };
        assert_eq!(reason, CloseReason::Superseded);

        let live = registry.all_live(1).await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].conn_id(), second.conn_id());
    }

    #[tokio::test]
    async fn violation_close_cleans_up_own_entry_only() {
        let registry = Registry::new();
        let (handle, mut rx) = ConnectionHandle::new();
        registry.register(1, 10, handle.clone()).await;

        close_for_violation(&registry, &handle, 1, 10).await;

        let Some(Frame::Close(reason)) = rx.recv().await else {
            panic!("expected a close frame");
        };
        assert_eq!(reason, CloseReason::UnacceptableData);
        assert!(!registry.is_live(1, 10).await);

        // A successor registered before the stale cleanup stays untouched
        let (replacement, _rx) = ConnectionHandle::new();
        registry.register(1, 10, replacement).await;
        close_for_violation(&registry, &handle, 1, 10).await;
        assert!(registry.is_live(1, 10).await);
    }
}
