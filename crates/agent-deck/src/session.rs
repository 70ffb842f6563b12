//! In-memory registry of dashboard sessions.
//!
//! Every mutation is announced on the event bus so connected dashboards update
//! without polling.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use agent_deck_protocol::EventType;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::events::{Event, EventBus};

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Idle,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "idle" => Ok(Self::Idle),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(SessionError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub project_path: String,
    pub profile_dir: PathBuf,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_nodes: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub project_path: String,
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid session id: {0:?}")]
    InvalidId(String),

    #[error("invalid session status: {0}")]
    InvalidStatus(String),

    #[error("projectPath must not be empty")]
    MissingProjectPath,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "CONFLICT",
            Self::InvalidId(_) | Self::InvalidStatus(_) | Self::MissingProjectPath => {
                "INVALID_REQUEST"
            }
        }
    }
}

/// Session ids become path components, so they are limited to a safe set.
pub fn validate_session_id(id: &str) -> Result<(), SessionError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidId(id.to_string()))
    }
}

fn default_title(project_path: &str) -> String {
    Path::new(project_path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(project_path)
        .to_string()
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    bus: EventBus,
    default_profile_dir: PathBuf,
}

impl SessionRegistry {
    pub fn new(bus: EventBus, default_profile_dir: PathBuf) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            bus,
            default_profile_dir,
        }
    }

    pub fn create(&self, request: NewSession) -> Result<Session, SessionError> {
        let project_path = request.project_path.trim().to_string();
        if project_path.is_empty() {
            return Err(SessionError::MissingProjectPath);
        }
        let id = match request.id {
            Some(id) => {
                validate_session_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let now = Utc::now();
        let session = Session {
            title: request
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| default_title(&project_path)),
            profile_dir: request
                .profile_dir
                .unwrap_or_else(|| self.default_profile_dir.clone()),
            id: id.clone(),
            project_path,
            status: SessionStatus::Starting,
            conversation_file: None,
            total_nodes: None,
            created_at: now,
            updated_at: now,
        };

        {
            let mut sessions = self.write();
            if sessions.contains_key(&id) {
                return Err(SessionError::AlreadyExists(id));
            }
            sessions.insert(id.clone(), session.clone());
        }

        info!("session {} created for {}", id, session.project_path);
        self.emit(EventType::SessionCreated, &session);
        Ok(session)
    }

    pub fn remove(&self, id: &str) -> Result<Session, SessionError> {
        let session = self
            .write()
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        info!("session {} removed", id);
        self.emit(EventType::SessionRemoved, &session);
        Ok(session)
    }

    pub fn set_status(&self, id: &str, status: SessionStatus) -> Result<Session, SessionError> {
        let (session, previous) = {
            let mut sessions = self.write();
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            let previous = session.status;
            session.status = status;
            session.updated_at = Utc::now();
            (session.clone(), previous)
        };

        debug!("session {} status {} -> {}", id, previous, status);
        self.bus.emit(Event::new(
            EventType::SessionStatusChanged,
            id,
            json!({
                "sessionId": id,
                "status": status,
                "previous": previous,
            }),
        ));
        Ok(session)
    }

    /// Remember which log backs the session. Emits `session.updated` and
    /// returns `true` only when the file or node count changed.
    pub fn record_conversation(
        &self,
        id: &str,
        file: Option<&Path>,
        total_nodes: usize,
    ) -> Result<bool, SessionError> {
        let updated = {
            let mut sessions = self.write();
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            let unchanged = session.conversation_file.as_deref() == file
                && session.total_nodes == Some(total_nodes);
            if unchanged {
                None
            } else {
                session.conversation_file = file.map(Path::to_path_buf);
                session.total_nodes = Some(total_nodes);
                session.updated_at = Utc::now();
                Some(session.clone())
            }
        };

        match updated {
            Some(session) => {
                self.emit(EventType::SessionUpdated, &session);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.read().get(id).cloned()
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, event_type: EventType, session: &Session) {
        self.bus
            .emit(Event::with_payload(event_type, session.id.clone(), session));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn registry() -> (SessionRegistry, Arc<Mutex<Vec<Event>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        (
            SessionRegistry::new(bus, PathBuf::from("/tmp/profile")),
            seen,
        )
    }

    fn new_session(id: &str) -> NewSession {
        NewSession {
            id: Some(id.to_string()),
            project_path: "/home/dev/project".to_string(),
            ..Default::default()
        }
    }

    fn event_types(seen: &Arc<Mutex<Vec<Event>>>) -> Vec<EventType> {
        seen.lock().unwrap().iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn test_create_defaults() {
        let (registry, seen) = registry();
        let session = registry.create(new_session("s1")).unwrap();

        assert_eq!(session.title, "project");
        assert_eq!(session.status, SessionStatus::Starting);
        assert_eq!(session.profile_dir, PathBuf::from("/tmp/profile"));
        assert_eq!(event_types(&seen), vec![EventType::SessionCreated]);
        assert_eq!(seen.lock().unwrap()[0].channel, "s1");
        assert_eq!(seen.lock().unwrap()[0].data["projectPath"], "/home/dev/project");
    }

    #[test]
    fn test_create_generates_id() {
        let (registry, _) = registry();
        let session = registry
            .create(NewSession {
                project_path: "/p".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(validate_session_id(&session.id).is_ok());
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let (registry, seen) = registry();
        assert_eq!(
            registry.create(new_session("../escape")).unwrap_err().code(),
            "INVALID_REQUEST"
        );
        assert_eq!(
            registry
                .create(NewSession {
                    project_path: "  ".to_string(),
                    ..Default::default()
                })
                .unwrap_err(),
            SessionError::MissingProjectPath
        );
        registry.create(new_session("dup")).unwrap();
        assert_eq!(
            registry.create(new_session("dup")).unwrap_err(),
            SessionError::AlreadyExists("dup".to_string())
        );
        assert_eq!(event_types(&seen), vec![EventType::SessionCreated]);
    }

    #[test]
    fn test_status_change_event() {
        let (registry, seen) = registry();
        registry.create(new_session("s1")).unwrap();
        registry.set_status("s1", SessionStatus::Running).unwrap();

        let events = seen.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::SessionStatusChanged);
        assert_eq!(last.data["status"], "running");
        assert_eq!(last.data["previous"], "starting");
        assert_eq!(last.data["sessionId"], "s1");
    }

    #[test]
    fn test_record_conversation_emits_only_on_change() {
        let (registry, seen) = registry();
        registry.create(new_session("s1")).unwrap();
        let file = PathBuf::from("/logs/a.jsonl");

        assert!(registry.record_conversation("s1", Some(file.as_path()), 3).unwrap());
        assert!(!registry.record_conversation("s1", Some(file.as_path()), 3).unwrap());
        assert!(registry.record_conversation("s1", Some(file.as_path()), 4).unwrap());

        assert_eq!(
            event_types(&seen),
            vec![
                EventType::SessionCreated,
                EventType::SessionUpdated,
                EventType::SessionUpdated,
            ]
        );
        assert_eq!(registry.get("s1").unwrap().total_nodes, Some(4));
    }

    #[test]
    fn test_remove_and_not_found() {
        let (registry, seen) = registry();
        registry.create(new_session("s1")).unwrap();
        registry.remove("s1").unwrap();

        assert!(registry.get("s1").is_none());
        assert!(registry.is_empty());
        assert_eq!(
            registry.remove("s1").unwrap_err(),
            SessionError::NotFound("s1".to_string())
        );
        assert!(registry.set_status("s1", SessionStatus::Idle).is_err());
        assert_eq!(
            event_types(&seen),
            vec![EventType::SessionCreated, EventType::SessionRemoved]
        );
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("idle".parse::<SessionStatus>(), Ok(SessionStatus::Idle));
        assert_eq!(
            "paused".parse::<SessionStatus>(),
            Err(SessionError::InvalidStatus("paused".to_string()))
        );
    }
}
