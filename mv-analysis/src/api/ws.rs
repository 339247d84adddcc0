//! Persistent per-job event channel
//!
//! GET /ws/analysis/:job_id upgrades to a WebSocket that carries the job's
//! progress, alert and terminal events. The server closes the socket with
//! code 1000 right after the terminal event.

use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use mv_common::protocol::{ClientMessage, ServerMessage, NORMAL_CLOSURE};
use tokio::{select, time::MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{error::ApiResult, services::Subscription, AppState};

/// GET /ws/analysis/:job_id
///
/// Unknown jobs answer 404 before the upgrade is even checked. The
/// subscription is taken before upgrading so no event published during the
/// handshake is lost.
pub async fn analysis_socket(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    state.registry.status(job_id)?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let subscription = state.hub.subscribe(job_id);
    let heartbeat = state.config.events.heartbeat_interval();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription, heartbeat)))
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize channel message");
            return true;
        }
    };
    socket.send(Message::Text(json)).await.is_ok()
}

async fn handle_socket(mut socket: WebSocket, mut subscription: Subscription, heartbeat: Duration) {
    let job_id = subscription.job_id();
    info!(job_id = %job_id, subscriber = subscription.id(), "Channel connected");

    if !send_message(&mut socket, &ServerMessage::connected(job_id)).await {
        return;
    }

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        let message = match ServerMessage::from_event(&event) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!(job_id = %job_id, error = %e, "Failed to encode job event");
                                continue;
                            }
                        };
                        if !send_message(&mut socket, &message).await {
                            debug!(job_id = %job_id, "Channel send failed; client gone");
                            break;
                        }
                    }
                    None => {
                        let close = Message::Close(Some(CloseFrame {
                            code: NORMAL_CLOSURE,
                            reason: "analysis finished".into(),
                        }));
                        if let Err(e) = socket.send(close).await {
                            debug!(job_id = %job_id, error = %e, "Close frame not delivered");
                        }
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if !send_message(&mut socket, &ServerMessage::heartbeat()).await {
                    break;
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Pong) => debug!(job_id = %job_id, "Heartbeat acknowledged"),
                            Ok(ClientMessage::Ping) => {
                                if !send_message(&mut socket, &ServerMessage::heartbeat()).await {
                                    break;
                                }
                            }
                            Err(_) => debug!(job_id = %job_id, "Ignoring unrecognized client message"),
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    info!(
        job_id = %job_id,
        subscriber = subscription.id(),
        dropped = subscription.dropped(),
        "Channel closed"
    );
}

/// Build WebSocket routes
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws/analysis/:job_id", get(analysis_socket))
}
