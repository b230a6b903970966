//! WebSocket entry point for a live chat session.
//!
//! `/ws/{user_id}/{other_id}` opens a session in which every text frame is a
//! message from `user_id` to `other_id`. The socket also receives every line
//! the router broadcasts. Reading and writing run as two tasks joined by the
//! connection's outbound queue.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{future, SinkExt, Stream, StreamExt};
use tracing::debug;

use super::http::AppState;
use crate::chat::UserId;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((user_id, other_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, UserId(user_id), UserId(other_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, sender: UserId, recipient: UserId) {
    let (mut ws_sender, ws_receiver) = socket.split();
    let (connection, mut outbox) = state.router.registry().open(sender);
    let connection_id = connection.id;

    let writer = tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if ws_sender.send(Message::Text(payload)).await.is_err() {
                // Peer is gone; the reader side will notice and unregister.
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let inbound = Box::pin(text_frames(ws_receiver));

    state
        .router
        .run_session(sender, recipient, connection, inbound)
        .await;

    // Unregistering dropped the last handle to the outbox, which ends the writer.
    if let Err(e) = writer.await {
        debug!(connection = %connection_id, error = %e, "socket writer task failed");
    }
}

/// Text frames become messages and a close frame ends the stream. Protocol
/// frames (binary, ping, pong) are skipped; transport errors pass through.
fn text_frames<S, E>(frames: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<Message, E>>,
{
    frames
        .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(frames: Vec<Result<Message, String>>) -> Vec<Result<String, String>> {
        text_frames(futures::stream::iter(frames)).collect().await
    }

    #[tokio::test]
    async fn only_text_before_close_comes_through() {
        let out = collect(vec![
            Ok(Message::Text("first".to_string())),
            Ok(Message::Binary(vec![1, 2, 3])),
            Ok(Message::Ping(vec![9])),
            Ok(Message::Pong(vec![9])),
            Ok(Message::Text("second".to_string())),
            Ok(Message::Close(None)),
            Ok(Message::Text("after close".to_string())),
        ])
        .await;

        assert_eq!(out, vec![Ok("first".to_string()), Ok("second".to_string())]);
    }

    #[tokio::test]
    async fn errors_are_passed_to_the_session() {
        let out = collect(vec![
            Ok(Message::Text("hi".to_string())),
            Err("reset".to_string()),
        ])
        .await;

        assert_eq!(out, vec![Ok("hi".to_string()), Err("reset".to_string())]);
    }

    #[tokio::test]
    async fn stream_of_only_control_frames_is_empty() {
        let out = collect(vec![
            Ok(Message::Ping(vec![])),
            Ok(Message::Pong(vec![])),
            Ok(Message::Binary(vec![0])),
        ])
        .await;

        assert!(out.is_empty());
    }
}
