//! Serialized per-connection write path.

use agent_deck_protocol::ServerMessage;
use tokio::sync::mpsc;

use super::hub::{ClientSink, SinkError};

/// Queue in front of a WebSocket's sending half.
///
/// Every writer (hub dispatch, command replies, heartbeats) goes through the
/// same bounded channel, drained by one task that owns the socket sink. A full
/// queue rejects the message instead of waiting.
#[derive(Debug, Clone)]
pub struct ConnectionWriter {
    tx: mpsc::Sender<ServerMessage>,
}

impl ConnectionWriter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ClientSink for ConnectionWriter {
    fn send(&self, msg: &ServerMessage) -> Result<(), SinkError> {
        self.tx.try_send(msg.clone()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
