//! WebSocket endpoint for streaming uploads.

use agent_deck_protocol::UploadReply;
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::UploadChannel;
use crate::api::{ApiError, AppState};

/// WebSocket upgrade handler.
///
/// GET /ws/upload/{session_id}
///
/// Read-only mode is enforced by the router before this handler runs.
pub async fn upload_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("session {session_id} not found")))?;

    let upload_dir = session.profile_dir.join("uploads").join(&session.id);
    let channel = UploadChannel::new(
        session.id,
        upload_dir,
        state.settings.upload,
        state.bus.clone(),
    );
    let shutdown = state.shutdown.clone();
    let tasks = state.tasks.clone();

    Ok(ws
        .on_failed_upgrade(|err| warn!("upload upgrade failed: {}", err))
        .on_upgrade(move |socket| {
            tasks.track_future(handle_upload_socket(socket, channel, shutdown))
        }))
}

/// Receive uploads on one socket until it closes or the server shuts down.
/// Any upload still in progress at that point is discarded.
pub async fn handle_upload_socket(
    socket: WebSocket,
    mut channel: UploadChannel,
    shutdown: CancellationToken,
) {
    let (mut sender, mut receiver) = socket.split();
    info!("upload socket opened for {}", channel.upload_dir().display());

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = receiver.next() => frame,
        };

        let result = match frame {
            Some(Ok(Message::Text(text))) => channel.handle_text(text.as_str()).await,
            Some(Ok(Message::Binary(data))) => channel.write_chunk(&data).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("upload socket read error: {}", e);
                break;
            }
        };

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(err) => {
                warn!("upload failed ({}): {}", err.code(), err);
                channel.abort();
                UploadReply::Error {
                    code: err.code().to_string(),
                    data: err.to_string(),
                }
            }
        };

        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize upload reply: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }

    if channel.is_active() {
        info!("upload socket closed with an upload in progress, discarding it");
    }
    channel.abort();
}
