//! Line-level parsing of conversation logs.

use std::io::{self, BufRead};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Lines longer than this are skipped without being buffered in full.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

const COMPACT_BOUNDARY: &str = "compact_boundary";

/// One parsed log line that carries a uuid.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationEntry {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub logical_parent_uuid: Option<String>,
    /// Timestamp exactly as written in the log.
    pub timestamp: String,
    pub entry_type: String,
    pub subtype: Option<String>,
    pub message: Option<Value>,
    /// Zero-based physical line number in the file.
    pub line_index: usize,
    sort_time: Option<DateTime<Utc>>,
}

impl ConversationEntry {
    pub fn is_compact_boundary(&self) -> bool {
        self.entry_type == COMPACT_BOUNDARY || self.subtype.as_deref() == Some(COMPACT_BOUNDARY)
    }

    /// Parent used when walking towards the root. Compaction boundaries have
    /// no physical parent and point at the pre-compaction tail instead.
    pub fn effective_parent(&self) -> Option<&str> {
        match self.parent_uuid.as_deref() {
            Some(parent) => Some(parent),
            None if self.is_compact_boundary() => self.logical_parent_uuid.as_deref(),
            None => None,
        }
    }

    /// Ordering key for choosing the newest tip.
    pub fn recency_key(&self) -> (Option<DateTime<Utc>>, usize) {
        (self.sort_time, self.line_index)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    parent_uuid: Option<String>,
    #[serde(default)]
    logical_parent_uuid: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type", default)]
    entry_type: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    message: Option<Value>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Entries of one log file plus the number of lines that could not be used.
#[derive(Debug, Default, Clone)]
pub struct ParsedLog {
    pub entries: Vec<ConversationEntry>,
    /// Malformed or oversized lines.
    pub skipped_lines: usize,
}

/// Parse a single line. Returns `None` for lines that are not JSON objects or
/// that carry no uuid.
pub fn parse_line(line: &[u8], line_index: usize) -> Option<ConversationEntry> {
    let value: Value = serde_json::from_slice(line).ok()?;
    entry_from_value(value, line_index)
}

fn entry_from_value(value: Value, line_index: usize) -> Option<ConversationEntry> {
    let raw = RawEntry::deserialize(value).ok()?;
    let uuid = non_empty(raw.uuid)?;
    let timestamp = raw.timestamp.unwrap_or_default();
    let sort_time = DateTime::parse_from_rfc3339(&timestamp)
        .ok()
        .map(|t| t.with_timezone(&Utc));

    Some(ConversationEntry {
        uuid,
        parent_uuid: non_empty(raw.parent_uuid),
        logical_parent_uuid: non_empty(raw.logical_parent_uuid),
        timestamp,
        entry_type: raw.entry_type.unwrap_or_default(),
        subtype: raw.subtype,
        message: raw.message.filter(|m| !m.is_null()),
        line_index,
        sort_time,
    })
}

enum LineRead {
    Eof,
    Line,
    Oversized,
}

/// Read up to the next `\n`, keeping at most [`MAX_LINE_BYTES`] in `buf`.
fn read_bounded_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<LineRead> {
    buf.clear();
    let mut seen_any = false;
    let mut oversized = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }
        seen_any = true;

        let (chunk_len, consumed, done) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos, pos + 1, true),
            None => (available.len(), available.len(), false),
        };

        if !oversized {
            if buf.len() + chunk_len > MAX_LINE_BYTES {
                oversized = true;
                buf.clear();
            } else {
                buf.extend_from_slice(&available[..chunk_len]);
            }
        }
        reader.consume(consumed);

        if done {
            break;
        }
    }

    Ok(match (seen_any, oversized) {
        (false, _) => LineRead::Eof,
        (true, true) => LineRead::Oversized,
        (true, false) => LineRead::Line,
    })
}

/// Parse a whole JSONL stream.
///
/// Blank lines and lines without a uuid are ignored; malformed and oversized
/// lines are skipped and counted. Line indices always refer to physical lines.
pub fn parse_entries<R: BufRead>(mut reader: R) -> io::Result<ParsedLog> {
    let mut parsed = ParsedLog::default();
    let mut buf = Vec::new();
    let mut line_index = 0usize;

    loop {
        match read_bounded_line(&mut reader, &mut buf)? {
            LineRead::Eof => break,
            LineRead::Oversized => parsed.skipped_lines += 1,
            LineRead::Line => {
                let line = buf.trim_ascii();
                if !line.is_empty() {
                    match serde_json::from_slice::<Value>(line) {
                        Ok(value @ Value::Object(_)) => {
                            parsed.entries.extend(entry_from_value(value, line_index));
                        }
                        _ => parsed.skipped_lines += 1,
                    }
                }
            }
        }
        line_index += 1;
    }

    Ok(parsed)
}
