//! Streaming upload channel.
//!
//! Files are streamed over `/ws/upload/{session_id}`: a `start` text frame
//! declares name and size, binary frames carry the bytes, and `end` finalizes
//! the file under `<profile-dir>/uploads/<session-id>/`. Progress is reported
//! to the uploader and broadcast on the event bus.

mod channel;
mod handler;

use thiserror::Error;

pub use channel::{UploadChannel, UploadLimits};
pub use handler::{handle_upload_socket, upload_ws};

/// Fallback name when nothing usable is left after sanitizing.
pub const UNNAMED_FILE: &str = "unnamed";

/// Upload failures. Each is reported to the uploader as
/// `{type:"error", code, data}`; the upload is reset and the socket stays open.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file exceeds the {limit} byte upload limit")]
    TooLarge { limit: u64 },

    #[error("invalid upload size: {0}")]
    InvalidSize(i64),

    #[error("invalid start message: {0}")]
    InvalidStart(String),

    #[error("invalid upload message: {0}")]
    InvalidMessage(String),

    #[error("no upload in progress")]
    NoUploadInProgress,

    #[error("upload ended after {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("failed to write upload: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("failed to create upload directory: {0}")]
    MkdirFailed(#[source] std::io::Error),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "TOO_LARGE",
            Self::InvalidSize(_) => "INVALID_SIZE",
            Self::InvalidStart(_) => "INVALID_START",
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
            Self::NoUploadInProgress => "NO_UPLOAD_IN_PROGRESS",
            Self::Incomplete { .. } => "INCOMPLETE",
            Self::WriteFailed(_) => "WRITE_FAILED",
            Self::MkdirFailed(_) => "MKDIR_FAILED",
        }
    }
}

/// Make a client-supplied filename safe to use as a single path component.
///
/// Control characters, path separators and `..` sequences are removed, the
/// result is trimmed and capped at `max_bytes` (on a char boundary). Empty
/// results become [`UNNAMED_FILE`].
pub fn sanitize_filename(filename: &str, max_bytes: usize) -> String {
    let mut sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control() && *c != '/' && *c != '\\')
        .collect();
    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "");
    }

    let mut name = sanitized.trim();
    if name.len() > max_bytes {
        let mut end = max_bytes;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name = name[..end].trim_end();
    }

    if name.is_empty() {
        UNNAMED_FILE.to_string()
    } else {
        name.to_string()
    }
}
