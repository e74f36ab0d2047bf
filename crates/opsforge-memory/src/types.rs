use serde::{Deserialize, Serialize};

/// What kind of memory an item records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Decision,
    Context,
    Preference,
    Issue,
    TaskInput,
    TaskResult,
}

impl MemoryType {
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Decision,
        MemoryType::Context,
        MemoryType::Preference,
        MemoryType::Issue,
        MemoryType::TaskInput,
        MemoryType::TaskResult,
    ];
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decision => write!(f, "decision"),
            Self::Context => write!(f, "context"),
            Self::Preference => write!(f, "preference"),
            Self::Issue => write!(f, "issue"),
            Self::TaskInput => write!(f, "task_input"),
            Self::TaskResult => write!(f, "task_result"),
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(Self::Decision),
            "context" => Ok(Self::Context),
            "preference" => Ok(Self::Preference),
            "issue" => Ok(Self::Issue),
            "task_input" => Ok(Self::TaskInput),
            "task_result" => Ok(Self::TaskResult),
            other => Err(format!("unknown memory type: {other}")),
        }
    }
}

/// Where an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Conversation,
    Task,
    Manual,
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Task => write!(f, "task"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(Self::Conversation),
            "task" => Ok(Self::Task),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown memory source: {other}")),
        }
    }
}

/// One stored memory item. Items are never deleted; duplicates reinforce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: i64,
    #[serde(rename = "type")]
    pub item_type: MemoryType,
    pub content: String,
    pub content_hash: String,
    pub source: MemorySource,
    pub source_id: Option<String>,
    pub project_path: String,
    pub created_by: String,
    pub created_at: String,
    pub reinforcement_count: i64,
    pub last_reinforced_at: Option<String>,
}

/// Input for [`crate::MemoryEngine::add_item`].
#[derive(Debug, Clone)]
pub struct NewMemoryItem {
    pub item_type: MemoryType,
    pub content: String,
    pub source: MemorySource,
    pub source_id: Option<String>,
    pub project_path: String,
    pub created_by: String,
}

/// What `add_item` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddAction {
    Inserted,
    Reinforced,
}

#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub id: i64,
    pub action: AddAction,
}

/// Which search phase produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Vector,
    Keyword,
    Hybrid,
}

/// A hybrid-search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub item: MemoryItem,
    pub score: f64,
    pub match_source: MatchSource,
}

/// Compact per-type overview the Dispatcher embeds in its prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryIndex {
    pub entries: Vec<MemoryIndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryIndexEntry {
    #[serde(rename = "type")]
    pub item_type: MemoryType,
    pub count: i64,
    pub recent: Vec<MemoryPreview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPreview {
    pub id: i64,
    /// First 80 chars of content.
    pub preview: String,
    pub created_at: String,
    pub created_by: String,
}

/// One logged chat message inside a conversation shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChatMessage {
    pub role: String,
    pub content: String,
    pub sender_name: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_round_trips() {
        for t in MemoryType::ALL {
            let s = t.to_string();
            assert_eq!(s.parse::<MemoryType>().unwrap(), t);
        }
    }

    #[test]
    fn memory_source_round_trips() {
        for s in ["conversation", "task", "manual"] {
            let parsed: MemorySource = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }
}
