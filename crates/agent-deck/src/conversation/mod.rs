//! Conversation DAG resolver.
//!
//! Each session's agent appends one JSON object per line to a log file. Entries
//! link to their parent by uuid; edits and retries create sibling branches. The
//! resolver picks the newest log in a project directory, selects the most
//! recent branch and turns it into the message list served to the dashboard.
//!
//! Resolution is synchronous and does blocking file I/O; async callers should
//! run [`load_conversation`] on a blocking thread.

mod blocks;
mod dag;
mod entry;
mod locate;
mod messages;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use agent_deck_protocol::{ConversationMessage, DagInfo};
use thiserror::Error;

pub use blocks::{ContentBlock, parse_content};
pub use dag::{ResolvedBranch, resolve_active_branch};
pub use entry::{ConversationEntry, MAX_LINE_BYTES, ParsedLog, parse_entries, parse_line};
pub use locate::{conversation_dir, encode_project_path, find_conversation_file};
pub use messages::{Turn, TurnRole, build_messages, group_turns};

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("failed to read conversation log {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build conversation: {0}")]
    BuildFailed(String),
}

impl ConversationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileReadFailed { .. } => "FILE_READ_FAILED",
            Self::BuildFailed(_) => "BUILD_FAILED",
        }
    }
}

/// A resolved conversation ready to serve.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Log the conversation was read from; `None` when the directory had none.
    pub file: Option<PathBuf>,
    pub messages: Vec<ConversationMessage>,
    pub dag_info: DagInfo,
}

/// Resolve a single log file.
pub fn load_conversation_file(path: &Path) -> Result<Conversation, ConversationError> {
    let read_failed = |source: std::io::Error| ConversationError::FileReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(read_failed)?;
    let parsed = parse_entries(BufReader::new(file)).map_err(read_failed)?;
    let skipped_lines = parsed.skipped_lines;
    let branch = resolve_active_branch(parsed.entries);

    Ok(Conversation {
        file: Some(path.to_path_buf()),
        messages: build_messages(&branch.active_branch),
        dag_info: DagInfo {
            total_nodes: branch.total_nodes,
            branch_count: branch.branch_count,
            skipped_lines,
        },
    })
}

/// Resolve the newest log in `dir`. A missing or empty directory yields an
/// empty conversation.
pub fn load_conversation(dir: &Path) -> Result<Conversation, ConversationError> {
    let found = find_conversation_file(dir).map_err(|source| ConversationError::FileReadFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    match found {
        Some(path) => load_conversation_file(&path),
        None => Ok(Conversation::default()),
    }
}
