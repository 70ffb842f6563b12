//! Event type enumeration and channel buckets.
//!
//! Events are ephemeral signals for real-time dashboard updates. Each event type
//! belongs to exactly one broad channel ("bucket"); clients subscribe either to
//! a bucket or to a single session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Channel name used for per-session subscriptions.
pub const SESSION_CHANNEL: &str = "session";

// ============================================================================
// Event types
// ============================================================================

/// Closed set of event types that travel over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "session.status_changed")]
    SessionStatusChanged,
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "session.removed")]
    SessionRemoved,
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "task.removed")]
    TaskRemoved,
    #[serde(rename = "push.sent")]
    PushSent,
    #[serde(rename = "push.dismissed")]
    PushDismissed,
    #[serde(rename = "upload.progress")]
    UploadProgress,
    #[serde(rename = "upload.complete")]
    UploadComplete,
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 12] = [
        EventType::SessionStatusChanged,
        EventType::SessionCreated,
        EventType::SessionUpdated,
        EventType::SessionRemoved,
        EventType::TaskCreated,
        EventType::TaskUpdated,
        EventType::TaskRemoved,
        EventType::PushSent,
        EventType::PushDismissed,
        EventType::UploadProgress,
        EventType::UploadComplete,
        EventType::Heartbeat,
    ];

    /// Dotted internal name, e.g. `session.status_changed`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStatusChanged => "session.status_changed",
            Self::SessionCreated => "session.created",
            Self::SessionUpdated => "session.updated",
            Self::SessionRemoved => "session.removed",
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
            Self::TaskRemoved => "task.removed",
            Self::PushSent => "push.sent",
            Self::PushDismissed => "push.dismissed",
            Self::UploadProgress => "upload.progress",
            Self::UploadComplete => "upload.complete",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Short name sent to clients as `eventType`.
    ///
    /// The segment after the first `.` with underscores turned into dashes
    /// (`session.status_changed` -> `status-changed`).
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::SessionStatusChanged => "status-changed",
            Self::SessionCreated | Self::TaskCreated => "created",
            Self::SessionUpdated | Self::TaskUpdated => "updated",
            Self::SessionRemoved | Self::TaskRemoved => "removed",
            Self::PushSent => "sent",
            Self::PushDismissed => "dismissed",
            Self::UploadProgress => "progress",
            Self::UploadComplete => "complete",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// The broad channel this event is routed to.
    pub fn bucket(&self) -> Channel {
        Channel::for_event_type(self.as_str())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a name outside the closed event set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

// ============================================================================
// Channels
// ============================================================================

/// Broad subscription buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sessions,
    Tasks,
    Push,
    Uploads,
    System,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Sessions,
        Channel::Tasks,
        Channel::Push,
        Channel::Uploads,
        Channel::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Tasks => "tasks",
            Self::Push => "push",
            Self::Uploads => "uploads",
            Self::System => "system",
        }
    }

    /// Look up a bucket by its subscription name.
    pub fn from_name(name: &str) -> Option<Self> {
        Channel::ALL.iter().copied().find(|c| c.as_str() == name)
    }

    /// Map a dotted event type name to its bucket. Anything unrecognised lands
    /// in `system`.
    pub fn for_event_type(event_type: &str) -> Self {
        let prefix = event_type.split('.').next().unwrap_or_default();
        match prefix {
            "session" => Self::Sessions,
            "task" => Self::Tasks,
            "push" => Self::Push,
            "upload" => Self::Uploads,
            _ => Self::System,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived_wire_name(name: &str) -> String {
        let tail = name.split_once('.').map(|(_, rest)| rest).unwrap_or(name);
        tail.replace('_', "-")
    }

    #[test]
    fn test_wire_names_follow_dotted_rule() {
        for t in EventType::ALL {
            assert_eq!(t.wire_name(), derived_wire_name(t.as_str()), "{t}");
        }
        assert_eq!(EventType::SessionStatusChanged.wire_name(), "status-changed");
    }

    #[test]
    fn test_bucket_mapping() {
        assert_eq!(EventType::SessionStatusChanged.bucket(), Channel::Sessions);
        assert_eq!(EventType::SessionRemoved.bucket(), Channel::Sessions);
        assert_eq!(EventType::TaskUpdated.bucket(), Channel::Tasks);
        assert_eq!(EventType::PushDismissed.bucket(), Channel::Push);
        assert_eq!(EventType::UploadComplete.bucket(), Channel::Uploads);
        assert_eq!(EventType::Heartbeat.bucket(), Channel::System);
        assert_eq!(Channel::for_event_type("something.else"), Channel::System);
        assert_eq!(Channel::for_event_type(""), Channel::System);
    }

    #[test]
    fn test_event_type_serde_uses_dotted_names() {
        let json = serde_json::to_string(&EventType::SessionStatusChanged).unwrap();
        assert_eq!(json, "\"session.status_changed\"");

        let parsed: EventType = serde_json::from_str("\"upload.progress\"").unwrap();
        assert_eq!(parsed, EventType::UploadProgress);
    }

    #[test]
    fn test_event_type_from_str() {
        assert_eq!("task.removed".parse::<EventType>(), Ok(EventType::TaskRemoved));
        assert!("task.exploded".parse::<EventType>().is_err());
    }

    #[test]
    fn test_channel_from_name() {
        assert_eq!(Channel::from_name("uploads"), Some(Channel::Uploads));
        assert_eq!(Channel::from_name(SESSION_CHANNEL), None);
        assert_eq!(Channel::from_name("Sessions"), None);
    }
}
