//! Viewer session endpoint.
//!
//! The channel is server-to-client only. The reader half exists to notice the
//! client going away; whatever the client sends is ignored.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use crate::{
    hub::{Hub, SessionHandle, SESSION_QUEUE_CAPACITY},
    AppState,
};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub async fn frontend_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state.hub))
}

pub async fn handle_session(socket: WebSocket, hub: Hub) {
    let (session, mut frames) = SessionHandle::new(SESSION_QUEUE_CAPACITY);
    let id = session.id();
    hub.register(session);

    let (mut sink, mut stream) = socket.split();

    // Ends when the hub drops this session or the socket stops accepting frames.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {
            log_debug!("{id} writer finished");
            reader.abort();
        }
        _ = &mut reader => {
            log_debug!("{id} client went away");
            writer.abort();
        }
    }

    hub.deregister(id);
}
