//! Conversation transcript wire format served by `GET /api/messages/{id}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message of the active conversation branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub uuid: String,
    /// Empty for roots.
    pub parent_uuid: String,
    /// Entry type tag from the log (`user`, `assistant`, ...).
    #[serde(rename = "type")]
    pub entry_type: String,
    pub role: String,
    pub timestamp: String,
    /// Text blocks joined with newlines.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Present only when the message had `tool_use` blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolCall>>,
}

/// A tool invocation paired with its result, when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Shape of the conversation tree the branch was taken from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagInfo {
    pub total_nodes: usize,
    pub branch_count: usize,
    pub skipped_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub session_id: String,
    pub messages: Vec<ConversationMessage>,
    pub dag_info: DagInfo,
}
