//! Wire protocol types for Agent Deck.
//!
//! This crate defines the JSON frames exchanged between the dashboard frontend
//! and the backend:
//!
//! ```text
//! Dashboard <--[WS /ws/events: ClientFrame / ServerMessage]--> Hub <-- EventBus <-- producers
//! Dashboard --[WS /ws/upload/{id}: UploadCommand + binary]--> Upload channel
//! Dashboard --[GET /api/messages/{id}]--> MessagesResponse
//! ```
//!
//! Everything here is plain data. Routing, validation and I/O live in the
//! `agent-deck` crate.

pub mod events;
pub mod hub;
pub mod messages;
pub mod upload;

pub use events::{Channel, EventType, UnknownEventType, SESSION_CHANNEL};
pub use hub::{ClientFrame, ServerMessage};
pub use messages::{ConversationMessage, DagInfo, MessagesResponse, ToolCall};
pub use upload::{UploadCommand, UploadCompleteEvent, UploadProgressEvent, UploadReply};
