//! Augmented messages and turn grouping.

use std::collections::HashMap;

use agent_deck_protocol::{ConversationMessage, ToolCall};
use serde::Serialize;
use serde_json::Value;

use super::blocks::{ContentBlock, parse_content};
use super::entry::ConversationEntry;

struct ToolOutcome {
    text: String,
    is_error: bool,
}

/// Turn the active branch into wire messages.
///
/// Tool uses are paired with results found anywhere on the branch. User
/// messages that only carry tool results are folded into the tool calls and
/// not emitted on their own. Entries without a message payload (summaries,
/// compaction markers) are skipped.
pub fn build_messages(branch: &[ConversationEntry]) -> Vec<ConversationMessage> {
    let parsed: Vec<(&ConversationEntry, &Value, Vec<ContentBlock>)> = branch
        .iter()
        .filter_map(|entry| {
            let message = entry.message.as_ref().filter(|m| m.is_object())?;
            Some((entry, message, parse_content(message.get("content"))))
        })
        .collect();

    let mut outcomes: HashMap<&str, ToolOutcome> = HashMap::new();
    for (_, _, blocks) in &parsed {
        for block in blocks {
            if let ContentBlock::ToolResult {
                tool_use_id,
                text,
                is_error,
            } = block
            {
                outcomes.insert(
                    tool_use_id.as_str(),
                    ToolOutcome {
                        text: text.clone(),
                        is_error: *is_error,
                    },
                );
            }
        }
    }

    let mut messages = Vec::with_capacity(parsed.len());
    for (entry, message, blocks) in &parsed {
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or(entry.entry_type.as_str())
            .to_string();

        if role == "user" && !blocks.is_empty() && blocks.iter().all(ContentBlock::is_tool_result)
        {
            continue;
        }

        let mut texts = Vec::new();
        let mut thinking = Vec::new();
        let mut tools = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text(text) => texts.push(text.as_str()),
                ContentBlock::Thinking(text) => thinking.push(text.as_str()),
                ContentBlock::ToolUse { id, name, input } => {
                    let outcome = outcomes.get(id.as_str());
                    tools.push(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                        result: outcome.map(|o| o.text.clone()),
                        is_error: outcome.map(|o| o.is_error),
                    });
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }

        messages.push(ConversationMessage {
            uuid: entry.uuid.clone(),
            parent_uuid: entry.effective_parent().unwrap_or_default().to_string(),
            entry_type: entry.entry_type.clone(),
            role,
            timestamp: entry.timestamp.clone(),
            content: texts.join("\n"),
            thinking: (!thinking.is_empty()).then(|| thinking.join("\n")),
            tools: (!tools.is_empty()).then_some(tools),
        });
    }

    messages
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One user prompt or one collapsed assistant response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: TurnRole,
    /// Timestamp of the first message in the turn.
    pub timestamp: String,
    pub uuids: Vec<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolCall>,
}

impl Turn {
    fn start(role: TurnRole, message: &ConversationMessage) -> Self {
        Self {
            role,
            timestamp: message.timestamp.clone(),
            uuids: Vec::new(),
            content: String::new(),
            thinking: None,
            tools: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.content.is_empty() && self.thinking.is_none() && self.tools.is_empty()
    }

    fn absorb(&mut self, message: &ConversationMessage) {
        self.uuids.push(message.uuid.clone());
        append_paragraph(&mut self.content, &message.content);
        if let Some(thinking) = message.thinking.as_deref() {
            append_paragraph(self.thinking.get_or_insert_with(String::new), thinking);
        }
        if let Some(tools) = &message.tools {
            self.tools.extend(tools.iter().cloned());
        }
    }
}

fn append_paragraph(target: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push_str("\n\n");
    }
    target.push_str(text);
}

/// Group messages into turns for rendering.
///
/// A user message with non-empty text starts its own turn; everything up to
/// the next such message collapses into a single assistant turn. Assistant
/// turns with no text, thinking or tools are dropped.
pub fn group_turns(messages: &[ConversationMessage]) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();

    for message in messages {
        let is_prompt = message.role == "user" && !message.content.trim().is_empty();
        if is_prompt {
            let mut turn = Turn::start(TurnRole::User, message);
            turn.absorb(message);
            turns.push(turn);
            continue;
        }

        match turns.last_mut() {
            Some(turn) if turn.role == TurnRole::Assistant => turn.absorb(message),
            _ => {
                let mut turn = Turn::start(TurnRole::Assistant, message);
                turn.absorb(message);
                turns.push(turn);
            }
        }
    }

    turns.retain(|turn| turn.role == TurnRole::User || !turn.is_empty());
    turns
}
