//! Tool access policies.
//!
//! A policy is a pair of allow/deny lists over tool names. Entries may be a
//! literal name, a `group:<category>` reference expanded through a fixed
//! table, or a `prefix*` wildcard. Deny always wins; an empty allow list
//! means allow-all.

use serde::{Deserialize, Serialize};

/// Fixed category -> tool-name expansion table for `group:` entries.
const GROUPS: &[(&str, &[&str])] = &[
    ("file-read", &["read_file", "list_files"]),
    ("file-write", &["write_file", "delete_file"]),
    ("search", &["search_files"]),
    ("shell", &["execute_command"]),
    ("skill", &["skill"]),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// No restrictions.
    pub fn full() -> Self {
        Self::default()
    }

    /// Dispatcher profile: reading and searching only.
    pub fn read_only() -> Self {
        Self {
            allow: vec![
                "group:file-read".into(),
                "group:search".into(),
                "group:skill".into(),
            ],
            deny: Vec::new(),
        }
    }

    /// Everything except shell execution and deletion.
    pub fn safe() -> Self {
        Self {
            allow: Vec::new(),
            deny: vec!["group:shell".into(), "delete_file".into()],
        }
    }

    /// Resolve whether `name` is permitted: deny wins, then a non-empty
    /// allow list requires a match, and an empty allow list admits all.
    pub fn allows(&self, name: &str) -> bool {
        if self.deny.iter().any(|entry| entry_matches(entry, name)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|entry| entry_matches(entry, name))
    }
}

fn entry_matches(entry: &str, name: &str) -> bool {
    if entry == "*" {
        return true;
    }
    if let Some(category) = entry.strip_prefix("group:") {
        return GROUPS
            .iter()
            .find(|(cat, _)| *cat == category)
            .map(|(_, names)| names.contains(&name))
            .unwrap_or(false);
    }
    if let Some(prefix) = entry.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    entry == name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_admits_all() {
        let policy = ToolPolicy::full();
        assert!(policy.allows("read_file"));
        assert!(policy.allows("execute_command"));
    }

    #[test]
    fn deny_wins_over_allow() {
        let policy = ToolPolicy {
            allow: vec!["execute_command".into()],
            deny: vec!["execute_command".into()],
        };
        assert!(!policy.allows("execute_command"));
    }

    #[test]
    fn read_only_profile() {
        let policy = ToolPolicy::read_only();
        assert!(policy.allows("read_file"));
        assert!(policy.allows("list_files"));
        assert!(policy.allows("search_files"));
        assert!(!policy.allows("write_file"));
        assert!(!policy.allows("execute_command"));
    }

    #[test]
    fn safe_profile_denies_shell_and_delete() {
        let policy = ToolPolicy::safe();
        assert!(policy.allows("write_file"));
        assert!(!policy.allows("execute_command"));
        assert!(!policy.allows("delete_file"));
    }

    #[test]
    fn wildcard_suffix_matches_prefix() {
        let policy = ToolPolicy {
            allow: vec!["memory_*".into()],
            deny: Vec::new(),
        };
        assert!(policy.allows("memory_search"));
        assert!(!policy.allows("read_file"));
    }

    #[test]
    fn unknown_group_matches_nothing() {
        let policy = ToolPolicy {
            allow: vec!["group:nonexistent".into()],
            deny: Vec::new(),
        };
        assert!(!policy.allows("read_file"));
    }

    #[test]
    fn star_entry_in_deny_blocks_everything() {
        let policy = ToolPolicy {
            allow: vec!["read_file".into()],
            deny: vec!["*".into()],
        };
        assert!(!policy.allows("read_file"));
    }
}
