//! Frames for the `/ws/upload/{session_id}` streaming upload socket.
//!
//! The client drives the upload with text frames (`start`, `end`) and sends the
//! file body as binary frames in between.

use serde::{Deserialize, Serialize};

/// Text frames sent by the uploading client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadCommand {
    /// Begin a new upload. `size` is signed so that negative values can be
    /// rejected with a proper error instead of a parse failure.
    Start { filename: String, size: i64 },
    /// All bytes sent; finalize the file.
    End,
}

/// Text frames sent back to the uploading client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadReply {
    Progress {
        received: u64,
        total: u64,
    },
    Complete {
        path: String,
        filename: String,
        size: u64,
    },
    Error {
        code: String,
        data: String,
    },
}

/// Payload of `upload.progress` bus events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressEvent {
    pub session_id: String,
    pub filename: String,
    pub received: u64,
    pub total: u64,
}

/// Payload of `upload.complete` bus events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompleteEvent {
    pub session_id: String,
    pub filename: String,
    pub path: String,
    pub size: u64,
}
