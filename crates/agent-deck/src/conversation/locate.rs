//! Locating conversation logs on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Logs written by sub-agents live next to the main log and are ignored.
const AGENT_LOG_PREFIX: &str = "agent-";

/// Flatten an absolute project path into the directory name used under the
/// projects root: `/` and `.` become `-`, with exactly one leading `-`.
///
/// The encoding is lossy (`/a.b` and `/a/b` collide); lookups go straight to
/// the encoded directory and never try to reverse it.
pub fn encode_project_path(project_path: &str) -> String {
    let encoded: String = project_path
        .chars()
        .map(|c| if c == '/' || c == '.' { '-' } else { c })
        .collect();
    if encoded.starts_with('-') {
        encoded
    } else {
        format!("-{encoded}")
    }
}

/// Directory holding the logs for a project.
pub fn conversation_dir(projects_dir: &Path, project_path: &str) -> PathBuf {
    projects_dir.join(encode_project_path(project_path))
}

/// Pick the most recently modified `*.jsonl` log in `dir`.
///
/// A missing directory is not an error and yields `None`.
pub fn find_conversation_file(dir: &Path) -> io::Result<Option<PathBuf>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let is_log = path.extension().is_some_and(|ext| ext == "jsonl");
        let is_agent_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(AGENT_LOG_PREFIX));
        if !is_log || is_agent_log {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let newer = match &newest {
            None => true,
            Some((best_time, best_path)) => (modified, &path) > (*best_time, best_path),
        };
        if newer {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}
