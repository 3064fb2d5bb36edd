//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, PlayerInput};
use crate::http::middleware::{verify_jwt, JwtClaims};
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Replies meant for this connection only (pongs, parse errors)
const DIRECT_QUEUE_CAPACITY: usize = 32;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session token
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let token = query
        .token
        .ok_or_else(|| AppError::BadRequest("missing token".to_string()))?;

    let claims = verify_jwt(&token, &state.config.jwt_secret).map_err(|e| {
        warn!(error = %e, "WebSocket auth failed");
        AppError::from(e)
    })?;

    let handle = state
        .match_registry
        .find_available_match()
        .ok_or(AppError::NoMatchAvailable)?;

    info!(
        player_id = %claims.sub,
        match_id = %handle.id,
        admin = claims.is_admin(),
        "WebSocket upgrade for authenticated player"
    );
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, claims, handle)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, claims: JwtClaims, handle: MatchHandle) {
    let player_id = claims.sub;
    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before anything is queued so no broadcast is missed
    let broadcast_rx = handle.subscribe();

    let welcome = ServerMsg::Welcome {
        player_id,
        match_id: handle.id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id = %player_id, error = %e, "Failed to send welcome");
        return;
    }

    run_session(
        player_id,
        claims.is_admin(),
        claims.name,
        ws_sink,
        ws_stream,
        handle.input_tx.clone(),
        broadcast_rx,
    )
    .await;

    info!(player_id = %player_id, match_id = %handle.id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    player_id: Uuid,
    is_admin: bool,
    token_name: Option<String>,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    input_tx: mpsc::Sender<PlayerInput>,
    mut broadcast_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(DIRECT_QUEUE_CAPACITY);

    // Writer task: match broadcasts and direct replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(msg) => msg,
                    None => break,
                },
                broadcast = broadcast_rx.recv() => match broadcast {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(player_id = %player_id, lagged_count = n, "Client lagged, skipping {} messages", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(player_id = %player_id, "Broadcast channel closed");
                        break;
                    }
                },
            };

            if !is_addressed_to(&msg, player_id) {
                continue;
            }
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> match loop
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                let mut client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                        let _ = direct_tx.try_send(ServerMsg::Error {
                            code: "bad_message".to_string(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                };

                fill_display_name(&mut client_msg, token_name.as_deref());
                match client_msg {
                    ClientMsg::Ping { t } => {
                        let _ = direct_tx.try_send(ServerMsg::Pong { t });
                        continue;
                    }
                    ClientMsg::Admin { .. } if !rate_limiter.check_admin() => {
                        warn!(player_id = %player_id, "Rate limited admin command");
                        continue;
                    }
                    _ => {}
                }

                let input = PlayerInput {
                    player_id,
                    msg: client_msg,
                    is_admin,
                    received_at: unix_millis(),
                };
                if input_tx.send(input).await.is_err() {
                    debug!(player_id = %player_id, "Input channel closed");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to match loop
    let _ = input_tx
        .send(PlayerInput {
            player_id,
            msg: ClientMsg::Leave,
            is_admin,
            received_at: unix_millis(),
        })
        .await;

    writer_handle.abort();
}

/// A join without a display name takes the one from the session token
fn fill_display_name(msg: &mut ClientMsg, token_name: Option<&str>) {
    if let ClientMsg::Join { display_name } = msg {
        if display_name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            *display_name = token_name.map(str::to_string);
        }
    }
}

/// Denials go only to the player who made the request
fn is_addressed_to(msg: &ServerMsg, player_id: Uuid) -> bool {
    match msg {
        ServerMsg::Denied { player_id: to, .. } => *to == player_id,
        _ => true,
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denials_are_private() {
        let me = Uuid::from_u128(1);
        let denied = |player_id| ServerMsg::Denied {
            player_id,
            action: "jump".to_string(),
            reason: "not aboard".to_string(),
        };

        assert!(is_addressed_to(&denied(me), me));
        assert!(!is_addressed_to(&denied(Uuid::from_u128(2)), me));
        assert!(is_addressed_to(&ServerMsg::CountdownCancelled, me));
    }

    #[test]
    fn test_join_falls_back_to_token_name() {
        let mut join = ClientMsg::Join { display_name: None };
        fill_display_name(&mut join, Some("maverick"));
        assert!(matches!(
            join,
            ClientMsg::Join { display_name: Some(ref n) } if n == "maverick"
        ));

        let mut named = ClientMsg::Join {
            display_name: Some("ace".to_string()),
        };
        fill_display_name(&mut named, Some("maverick"));
        assert!(matches!(
            named,
            ClientMsg::Join { display_name: Some(ref n) } if n == "ace"
        ));

        let mut ready = ClientMsg::Ready;
        fill_display_name(&mut ready, Some("maverick"));
        assert!(matches!(ready, ClientMsg::Ready));
    }
}
