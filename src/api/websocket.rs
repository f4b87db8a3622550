use crate::api::rest::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use log::{debug, warn};
use uuid::Uuid;

/// Persistent per-account operator channel. Outbound only: create/status/plan
/// deltas flow here, operator actions go through the request API and come
/// back as deltas, so every connected operator converges on the same view.
pub async fn account_channel(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, account_id, socket))
}

async fn handle_socket(state: AppState, account_id: Uuid, socket: WebSocket) {
    let (subscriber_id, mut rx) = state.hub.subscribe(account_id).await;
    let (mut sender, mut receiver) = socket.split();

    debug!(
        "Operator channel {} opened for account {}",
        subscriber_id, account_id
    );

    loop {
        tokio::select! {
            delta = rx.recv() => {
                let Some(delta) = delta else { break };
                let json = match serde_json::to_string(&delta) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize channel message: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound frames are ignored; actions use the request API.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(&account_id, &subscriber_id).await;
    debug!(
        "Operator channel {} closed for account {}",
        subscriber_id, account_id
    );
}
