//! Content block extraction from message payloads.

use serde_json::Value;

/// A typed piece of message content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        text: String,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Parse `message.content`: either a plain string or an array of typed blocks.
/// Anything else (null, numbers, objects) yields no blocks. Unknown block
/// types such as images are dropped.
pub fn parse_content(content: Option<&Value>) -> Vec<ContentBlock> {
    match content {
        Some(Value::String(text)) if !text.is_empty() => vec![ContentBlock::Text(text.clone())],
        Some(Value::Array(items)) => items.iter().filter_map(parse_block).collect(),
        _ => Vec::new(),
    }
}

fn parse_block(block: &Value) -> Option<ContentBlock> {
    let kind = block.get("type").and_then(Value::as_str)?;
    match kind {
        "text" => Some(ContentBlock::Text(str_field(block, "text"))),
        "thinking" => Some(ContentBlock::Thinking(str_field(block, "thinking"))),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: str_field(block, "id"),
            name: str_field(block, "name"),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: str_field(block, "tool_use_id"),
            text: tool_result_text(block.get("content")),
            is_error: block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        _ => None,
    }
}

/// `tool_result.content` is either a string or an array of text blocks.
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
