pub mod handlers;
mod host;
mod player;

pub use handlers::Connection;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::{AppState, GameHandle};
use crate::types::Role;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub game: Option<String>,
    pub role: Option<String>,
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(
        "WebSocket connection request: game={:?}, role={:?}",
        params.game,
        params.role
    );

    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

/// Pick the requested game, or the only game when none was named
async fn resolve_game(state: &AppState, requested: Option<&str>) -> Option<Arc<GameHandle>> {
    match requested {
        Some(id) => state.get_game(id).await,
        None => {
            let games = state.list_games().await;
            match games.as_slice() {
                [only] => Some(only.clone()),
                _ => None,
            }
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let role = match params.role.as_deref() {
        Some("host") => Role::Host,
        Some("player") => Role::Player,
        _ => Role::Observer,
    };

    let Some(game) = resolve_game(&state, params.game.as_deref()).await else {
        let _ = send(
            &mut sender,
            &ServerMessage::error("NOT_FOUND", "Unknown or unspecified game"),
        )
        .await;
        return;
    };

    let conn = Connection::new(game.clone(), role, params.token.clone());
    let player = match (role, conn.seat()) {
        (Role::Player, Err(e)) => {
            let _ = send(&mut sender, &e).await;
            return;
        }
        (_, seat) => seat.ok(),
    };

    tracing::info!(
        game_id = %game.id(),
        role = ?role,
        player_id = ?conn.player_id,
        "WebSocket connected"
    );

    // Subscribe before the welcome so nothing falls between the two
    let mut events = game.subscribe_events();
    let mut snapshots = game.subscribe_snapshots();
    let snapshot = snapshots.borrow_and_update().refreshed(chrono::Utc::now());
    let mut last_seq = snapshot.last_seq;

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        role,
        player,
        server_now: snapshot.server_now,
        snapshot: Box::new(snapshot),
    };
    if !send(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if event.seq <= last_seq {
                            continue;
                        }
                        last_seq = event.seq;
                        if !send(&mut sender, &ServerMessage::Event { event }).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // The snapshot still has everything; replay the gap
                        tracing::warn!(game_id = %game.id(), skipped, "Client lagged, replaying events");
                        let missed = game.events_since(last_seq);
                        last_seq = missed.last().map(|e| e.seq).unwrap_or(last_seq);
                        let msg = ServerMessage::Events {
                            events: missed,
                            last_seq,
                        };
                        if !send(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().refreshed(chrono::Utc::now());
                let msg = ServerMessage::Snapshot {
                    snapshot: Box::new(snapshot),
                };
                if !send(&mut sender, &msg).await {
                    break;
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => handlers::handle_message(client_msg, &conn, &state).await,
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                Some(ServerMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                ))
                            }
                        };
                        if let Some(response) = response {
                            if !send(&mut sender, &response).await {
                                tracing::error!("Failed to send response");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!(game_id = %game.id(), role = ?role, "WebSocket connection closed");
}
