use std::path::{Path, PathBuf};

use agent_deck_protocol::{
    EventType, UploadCommand, UploadCompleteEvent, UploadProgressEvent, UploadReply,
};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{UploadError, sanitize_filename};
use crate::events::{Event, EventBus};

/// Size limits applied to every upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_size_bytes: u64,
    pub progress_step_bytes: u64,
    pub max_filename_bytes: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_size_bytes: 100 * 1024 * 1024,
            progress_step_bytes: 64 * 1024,
            max_filename_bytes: 200,
        }
    }
}

/// State of the upload currently being received.
///
/// The target file is removed when the session is dropped before completion.
#[derive(Debug)]
struct UploadSession {
    filename: String,
    path: PathBuf,
    total: u64,
    received: u64,
    last_progress: u64,
    file: Option<File>,
    completed: bool,
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.file.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed partial upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "failed to remove partial upload {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Upload state machine for one WebSocket connection.
///
/// At most one upload is in flight; a new `start` discards the previous
/// partial file.
pub struct UploadChannel {
    session_id: String,
    upload_dir: PathBuf,
    limits: UploadLimits,
    bus: EventBus,
    current: Option<UploadSession>,
}

impl UploadChannel {
    /// `upload_dir` is the per-session directory, created on the first start.
    pub fn new(
        session_id: impl Into<String>,
        upload_dir: PathBuf,
        limits: UploadLimits,
        bus: EventBus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            upload_dir,
            limits,
            bus,
            current: None,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Handle a text frame (`start` or `end`).
    pub async fn handle_text(&mut self, raw: &str) -> Result<Option<UploadReply>, UploadError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| UploadError::InvalidMessage(e.to_string()))?;
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();

        let command: UploadCommand = match serde_json::from_value(value.clone()) {
            Ok(command) => command,
            Err(e) if kind == "start" => return Err(UploadError::InvalidStart(e.to_string())),
            Err(_) => {
                return Err(UploadError::InvalidMessage(format!(
                    "unsupported message type: {kind}"
                )));
            }
        };

        match command {
            UploadCommand::Start { filename, size } => {
                self.start(&filename, size).await?;
                Ok(None)
            }
            UploadCommand::End => self.finish().await.map(Some),
        }
    }

    /// Begin a new upload, discarding any partial one.
    pub async fn start(&mut self, filename: &str, size: i64) -> Result<(), UploadError> {
        self.abort();

        if size <= 0 {
            return Err(UploadError::InvalidSize(size));
        }
        let total = size as u64;
        if total > self.limits.max_size_bytes {
            return Err(UploadError::TooLarge {
                limit: self.limits.max_size_bytes,
            });
        }

        create_private_dir(&self.upload_dir)
            .await
            .map_err(UploadError::MkdirFailed)?;

        let filename = sanitize_filename(filename, self.limits.max_filename_bytes);
        let path = self
            .upload_dir
            .join(format!("{}-{}", Uuid::new_v4().simple(), filename));
        let file = open_private_file(&path)
            .await
            .map_err(UploadError::WriteFailed)?;

        info!(
            "upload started for session {}: {} ({} bytes)",
            self.session_id, filename, total
        );
        self.current = Some(UploadSession {
            filename,
            path,
            total,
            received: 0,
            last_progress: 0,
            file: Some(file),
            completed: false,
        });
        self.emit_progress(0, total);
        Ok(())
    }

    /// Append a binary chunk. Returns a progress reply when a progress step
    /// was crossed or the declared size was reached.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<Option<UploadReply>, UploadError> {
        let limit = self.limits.max_size_bytes;
        let step = self.limits.progress_step_bytes.max(1);
        let upload = self
            .current
            .as_mut()
            .ok_or(UploadError::NoUploadInProgress)?;

        let received = upload.received + data.len() as u64;
        if received > upload.total || received > limit {
            return Err(UploadError::TooLarge { limit: upload.total });
        }

        let file = upload.file.as_mut().ok_or(UploadError::NoUploadInProgress)?;
        file.write_all(data).await.map_err(UploadError::WriteFailed)?;
        upload.received = received;

        if received - upload.last_progress >= step || received == upload.total {
            upload.last_progress = received;
            let total = upload.total;
            self.emit_progress(received, total);
            return Ok(Some(UploadReply::Progress { received, total }));
        }
        Ok(None)
    }

    /// Finalize the current upload.
    pub async fn finish(&mut self) -> Result<UploadReply, UploadError> {
        let upload = self
            .current
            .as_mut()
            .ok_or(UploadError::NoUploadInProgress)?;
        if upload.received != upload.total {
            return Err(UploadError::Incomplete {
                received: upload.received,
                expected: upload.total,
            });
        }

        if let Some(mut file) = upload.file.take() {
            file.flush().await.map_err(UploadError::WriteFailed)?;
            file.sync_all().await.map_err(UploadError::WriteFailed)?;
        }
        upload.completed = true;

        let reply = UploadReply::Complete {
            path: upload.path.display().to_string(),
            filename: upload.filename.clone(),
            size: upload.received,
        };
        info!(
            "upload complete for session {}: {}",
            self.session_id,
            upload.path.display()
        );
        self.bus.emit(Event::with_payload(
            EventType::UploadComplete,
            self.session_id.clone(),
            &UploadCompleteEvent {
                session_id: self.session_id.clone(),
                filename: upload.filename.clone(),
                path: upload.path.display().to_string(),
                size: upload.received,
            },
        ));
        self.current = None;
        Ok(reply)
    }

    /// Drop the current upload and remove its partial file.
    pub fn abort(&mut self) {
        if let Some(upload) = self.current.take() {
            debug!(
                "aborting upload {} for session {} at {}/{} bytes",
                upload.filename, self.session_id, upload.received, upload.total
            );
        }
    }

    fn emit_progress(&self, received: u64, total: u64) {
        let Some(upload) = self.current.as_ref() else {
            return;
        };
        self.bus.emit(Event::with_payload(
            EventType::UploadProgress,
            self.session_id.clone(),
            &UploadProgressEvent {
                session_id: self.session_id.clone(),
                filename: upload.filename.clone(),
                received,
                total,
            },
        ));
    }
}

impl Drop for UploadChannel {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(unix)]
async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .await
}

#[cfg(not(unix))]
async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir).await
}

async fn open_private_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}
