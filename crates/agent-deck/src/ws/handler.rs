//! WebSocket gateway for `/ws/events`.

use std::sync::Arc;
use std::time::Duration;

use agent_deck_protocol::ServerMessage;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::AppState;

use super::hub::{ClientSink, Hub};
use super::writer::ConnectionWriter;

/// How long the writer task gets to flush its close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection gateway settings.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub heartbeat_interval: Duration,
    pub client_buffer: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            client_buffer: 256,
        }
    }
}

/// WebSocket upgrade handler.
///
/// GET /ws/events
pub async fn events_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    let settings = state.settings.gateway;
    let shutdown = state.shutdown.clone();
    let tasks = state.tasks.clone();

    ws.on_failed_upgrade(|err| warn!("events upgrade failed: {}", err))
        .on_upgrade(move |socket| {
            tasks.track_future(handle_events_socket(socket, hub, settings, shutdown))
        })
}

/// Drive one dashboard connection until it closes or the server shuts down.
pub async fn handle_events_socket(
    socket: WebSocket,
    hub: Hub,
    settings: GatewaySettings,
    shutdown: CancellationToken,
) {
    let (mut sender, mut receiver) = socket.split();
    let (writer, mut outbound) = ConnectionWriter::channel(settings.client_buffer);

    // Queued ahead of registration so it is always the first frame.
    let _ = writer.send(&ServerMessage::Connected);
    let client_id = hub.register_client(Arc::new(writer.clone()));
    info!("events client {} connected", client_id);

    let stop = shutdown.child_token();
    let writer_stop = stop.clone();
    let heartbeat_interval = settings.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + heartbeat_interval,
            heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let msg = tokio::select! {
                _ = writer_stop.cancelled() => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: Utf8Bytes::from_static("server shutting down"),
                        })))
                        .await;
                    break;
                }
                msg = outbound.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = heartbeat.tick() => ServerMessage::Heartbeat,
            };

            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to serialize message for client {}: {}", client_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Err(err) = hub.handle_message(client_id, text.as_str()) {
                    debug!(
                        "rejected frame from client {} ({}): {}",
                        client_id,
                        err.code(),
                        err
                    );
                    let _ = writer.send(&ServerMessage::error(err.to_string()));
                }
            }
            Some(Ok(Message::Binary(_))) => {
                let _ = writer.send(&ServerMessage::error("binary frames are not supported"));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(Some(frame)))) if !is_expected_close(frame.code) => {
                warn!(
                    "client {} closed with unexpected code {}: {}",
                    client_id,
                    frame.code,
                    frame.reason.as_str()
                );
                break;
            }
            Some(Ok(Message::Close(_))) => break,
            Some(Err(e)) => {
                debug!("read error for client {}: {}", client_id, e);
                break;
            }
            None => break,
        }
    }

    hub.unregister_client(client_id);
    stop.cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    info!("events client {} disconnected", client_id);
}

fn is_expected_close(code: u16) -> bool {
    matches!(code, close_code::NORMAL | close_code::AWAY | close_code::STATUS)
}
