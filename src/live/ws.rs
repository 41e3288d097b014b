use crate::service::PollService;
use crate::startup::AppState;
use axum::{
    extract::{
        Extension,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(app_state): Extension<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state.service))
}

async fn handle_socket(socket: WebSocket, service: PollService) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (subscriber_id, mut rx) = service.subscribe();
    info!("Live client {} connected", subscriber_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            let text = match serde_json::to_string(notification.as_ref()) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {}: {}", notification.kind(), e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are ignored; the loop only watches for the close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    service.unsubscribe(subscriber_id);
    info!("Live client {} disconnected", subscriber_id);
}
