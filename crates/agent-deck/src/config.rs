//! Configuration model.
//!
//! [`AppConfig`] is what the binary deserializes from defaults, the TOML file
//! and `AGENT_DECK__*` environment variables. [`Settings`] is the resolved,
//! validated subset the server reads at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::session::NewSession;
use crate::upload::UploadLimits;
use crate::ws::GatewaySettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub events: EventsConfig,
    pub upload: UploadConfig,
    pub conversation: ConversationConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    /// Sessions registered at startup.
    pub sessions: Vec<SessionSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Reject uploads and session mutations.
    pub read_only: bool,
    /// Seconds to wait for open connections after a shutdown signal.
    pub shutdown_grace_secs: u64,
    /// Origins allowed to make cross-origin requests. Empty allows none.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
            read_only: false,
            shutdown_grace_secs: 5,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub heartbeat_interval_secs: u64,
    /// Outbound frames queued per connection before writes are dropped.
    pub client_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        let gateway = GatewaySettings::default();
        Self {
            heartbeat_interval_secs: gateway.heartbeat_interval.as_secs(),
            client_buffer: gateway.client_buffer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_size_bytes: u64,
    pub progress_step_bytes: u64,
    pub max_filename_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let limits = UploadLimits::default();
        Self {
            max_size_bytes: limits.max_size_bytes,
            progress_step_bytes: limits.progress_step_bytes,
            max_filename_bytes: limits.max_filename_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Root holding one directory per encoded project path.
    pub projects_dir: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            projects_dir: "~/.claude/projects".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
    pub state_dir: Option<String>,
    /// Defaults to `<data_dir>/profiles/default`.
    pub profile_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSeed {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub project_path: String,
}

impl From<&SessionSeed> for NewSession {
    fn from(seed: &SessionSeed) -> Self {
        NewSession {
            id: Some(seed.id.clone()),
            title: seed.title.clone(),
            project_path: seed.project_path.clone(),
            profile_dir: None,
        }
    }
}

/// Runtime settings shared by every request.
#[derive(Debug, Clone)]
pub struct Settings {
    pub read_only: bool,
    pub gateway: GatewaySettings,
    pub upload: UploadLimits,
    pub projects_dir: PathBuf,
    pub profile_dir: PathBuf,
    pub allowed_origins: Vec<String>,
}

impl Settings {
    /// Default limits rooted at the given directories.
    pub fn new(projects_dir: impl Into<PathBuf>, profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            read_only: false,
            gateway: GatewaySettings::default(),
            upload: UploadLimits::default(),
            projects_dir: projects_dir.into(),
            profile_dir: profile_dir.into(),
            allowed_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Resolve paths and clamp limits into runtime settings.
    pub fn settings(&self, data_dir: &Path) -> Result<Settings> {
        let projects_dir = expand_str_path(&self.conversation.projects_dir)
            .context("expanding conversation.projects_dir")?;
        let profile_dir = match self.paths.profile_dir.as_deref() {
            Some(dir) => expand_str_path(dir).context("expanding paths.profile_dir")?,
            None => data_dir.join("profiles").join("default"),
        };

        Ok(Settings {
            read_only: self.server.read_only,
            gateway: GatewaySettings {
                heartbeat_interval: Duration::from_secs(self.events.heartbeat_interval_secs.max(1)),
                client_buffer: self.events.client_buffer.max(1),
            },
            upload: UploadLimits {
                max_size_bytes: self.upload.max_size_bytes,
                progress_step_bytes: self.upload.progress_step_bytes.max(1),
                max_filename_bytes: self.upload.max_filename_bytes.max(1),
            },
            projects_dir,
            profile_dir,
            allowed_origins: self.server.allowed_origins.clone(),
        })
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}
