//! Active branch selection over the conversation tree.
//!
//! Edits and retries append sibling entries under an existing parent, so a log
//! describes a tree (occasionally with broken or cyclic links). The active
//! branch is the path from the most recent tip back to its root.

use std::collections::{HashMap, HashSet};

use super::entry::ConversationEntry;

/// Result of resolving the active branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedBranch {
    /// Root first.
    pub active_branch: Vec<ConversationEntry>,
    /// Distinct uuids in the log.
    pub total_nodes: usize,
    /// Number of tips (entries nobody points at).
    pub branch_count: usize,
}

/// Resolve the active branch. When a uuid appears more than once the last
/// occurrence wins.
pub fn resolve_active_branch(entries: Vec<ConversationEntry>) -> ResolvedBranch {
    let mut by_uuid: HashMap<String, ConversationEntry> = HashMap::with_capacity(entries.len());
    for entry in entries {
        by_uuid.insert(entry.uuid.clone(), entry);
    }
    if by_uuid.is_empty() {
        return ResolvedBranch::default();
    }

    // Only direct parent links make a child; compaction bridges are followed
    // during the walk but leave the pre-compaction tail as its own tip.
    let mut has_children: HashSet<&str> = HashSet::new();
    for entry in by_uuid.values() {
        if let Some(parent) = entry.parent_uuid.as_deref() {
            has_children.insert(parent);
        }
    }

    let tips: Vec<&ConversationEntry> = by_uuid
        .values()
        .filter(|entry| !has_children.contains(entry.uuid.as_str()))
        .collect();
    let branch_count = tips.len();

    // No tips means every entry sits on a cycle.
    let Some(start) = tips.into_iter().max_by_key(|entry| entry.recency_key()) else {
        return ResolvedBranch {
            active_branch: Vec::new(),
            total_nodes: by_uuid.len(),
            branch_count: 0,
        };
    };

    let mut active_branch = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut cursor = Some(start);
    while let Some(entry) = cursor {
        if !visited.insert(entry.uuid.as_str()) {
            break;
        }
        active_branch.push(entry.clone());
        cursor = entry
            .effective_parent()
            .and_then(|parent| by_uuid.get(parent));
    }
    active_branch.reverse();

    ResolvedBranch {
        total_nodes: by_uuid.len(),
        branch_count,
        active_branch,
    }
}
