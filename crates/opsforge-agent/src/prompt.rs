//! System prompt builders for both agent layers, plus cached project context.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use opsforge_memory::types::{MemoryIndex, SearchHit};
use opsforge_memory::types::StoredChatMessage;

/// Lazily built, cached description of the target project: name, README
/// head, and a shallow directory tree.
pub struct ProjectContext {
    path: PathBuf,
    cache: Mutex<Option<String>>,
}

impl ProjectContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn get(&self) -> String {
        let mut cache = self.cache.lock().unwrap();
        if let Some(cached) = cache.as_ref() {
            return cached.clone();
        }
        let built = build_project_context(&self.path);
        *cache = Some(built.clone());
        built
    }
}

fn build_project_context(path: &Path) -> String {
    let mut out = String::new();

    for manifest in ["package.json", "Cargo.toml", "pyproject.toml", "go.mod"] {
        let p = path.join(manifest);
        if p.exists() {
            out.push_str(&format!("Project manifest: {manifest}\n"));
            break;
        }
    }

    for readme in ["README.md", "README.rst", "README.txt", "readme.md"] {
        if let Ok(content) = std::fs::read_to_string(path.join(readme)) {
            let head: String = content.chars().take(2_000).collect();
            out.push_str("README (head):\n");
            out.push_str(&head);
            out.push('\n');
            break;
        }
    }

    out.push_str("Top-level entries:\n");
    if let Ok(entries) = std::fs::read_dir(path) {
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                if e.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .filter(|n| !n.starts_with(".git"))
            .collect();
        names.sort();
        for name in names.iter().take(40) {
            out.push_str("  ");
            out.push_str(name);
            out.push('\n');
        }
    }

    out
}

/// Layer-1 system prompt: classification only, never writes code.
pub fn dispatcher_system_prompt() -> String {
    concat!(
        "You are the dispatcher for a DevOps assistant living in team chat. ",
        "You never modify code yourself. For each user message decide one of three intents:\n",
        "- \"chat\": answer conversationally (questions, discussion, status).\n",
        "- \"query_memory\": the user asks what the team previously discussed or decided; \
           answer from the memory context provided.\n",
        "- \"create_task\": the user wants code changed in the repository. \
           Provide a short taskTitle and a concrete taskDescription.\n\n",
        "You may use the provided read-only tools to look at the repository before deciding.\n\n",
        "Respond with ONLY a JSON object:\n",
        "{\"intent\":\"chat|query_memory|create_task\",\"reply\":\"...\",\
          \"taskTitle\":\"...\",\"taskDescription\":\"...\"}\n",
        "reply is required for chat/query_memory; taskTitle and taskDescription \
         are required for create_task. No code fences, no prose around the JSON.",
    )
    .to_string()
}

/// Layer-2 system prompt: identity, safety, workflow, sandbox constraints.
pub fn executor_system_prompt(
    project_rules: Option<&str>,
    worktree_note: &str,
    tool_names: &[String],
) -> String {
    let mut out = String::new();
    out.push_str(
        "You are an autonomous DevOps engineer. You receive one task and carry \
         it out by reading, writing, and running code with the tools provided.\n\n",
    );
    out.push_str(
        "Safety rules:\n\
         - Work only inside the sandbox worktree; never touch paths outside it.\n\
         - Never push, tag, or delete branches yourself; the runner handles publication.\n\
         - Keep commits small and focused; commit completed work with clear messages.\n\n",
    );
    out.push_str("Available tools: ");
    out.push_str(&tool_names.join(", "));
    out.push_str("\n\n");
    out.push_str(
        "Workflow: understand the task, locate the relevant code, make the \
         change, run the project's checks when feasible, then commit. Finish \
         with a short summary of what you changed and why.\n\n",
    );
    out.push_str(worktree_note);
    out.push('\n');
    if let Some(rules) = project_rules {
        out.push_str("\nProject rules:\n");
        out.push_str(rules);
        out.push('\n');
    }
    out.push_str(&format!(
        "\nCurrent date: {}\n",
        chrono::Utc::now().format("%Y-%m-%d")
    ));
    out
}

/// Render the per-type memory overview section.
pub fn render_memory_index(index: &MemoryIndex) -> String {
    let mut out = String::from("Memory index:\n");
    for entry in &index.entries {
        out.push_str(&format!("- {} ({} items)\n", entry.item_type, entry.count));
        for preview in &entry.recent {
            out.push_str(&format!(
                "    #{} {} [{} by {}]\n",
                preview.id, preview.preview, preview.created_at, preview.created_by
            ));
        }
    }
    out
}

/// Render hybrid-search hits in two stages under one budget: compact
/// summaries first, then full detail blocks while budget remains (details
/// only when the gate is open).
pub fn render_memory_hits(hits: &[SearchHit], budget: usize, include_details: bool) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut out = String::from("Relevant memory:\n");
    for hit in hits {
        let preview: String = hit.item.content.chars().take(160).collect();
        let line = format!(
            "- [{}] {} (score {:.2}, via {:?})\n",
            hit.item.item_type,
            preview,
            hit.score,
            hit.match_source
        );
        if out.len() + line.len() > budget {
            return out;
        }
        out.push_str(&line);
    }

    if include_details {
        for hit in hits {
            let block = format!(
                "\nDetail #{} [{}]:\n{}\n",
                hit.item.id, hit.item.item_type, hit.item.content
            );
            if out.len() + block.len() > budget {
                break;
            }
            out.push_str(&block);
        }
    }

    out
}

/// Render recent conversation: fill newest-first under the budget, emit in
/// chronological order.
pub fn render_recent_chat(messages: &[StoredChatMessage], budget: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let mut picked: Vec<&StoredChatMessage> = Vec::new();
    let mut used = 0usize;
    for msg in messages.iter().rev() {
        let cost = msg.sender_name.len() + msg.content.len() + 10;
        if used + cost > budget {
            break;
        }
        used += cost;
        picked.push(msg);
    }
    picked.reverse();

    let mut out = String::from("Recent conversation:\n");
    for msg in picked {
        out.push_str(&format!("{} ({}): {}\n", msg.role, msg.sender_name, msg.content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsforge_memory::types::{
        MatchSource, MemoryIndexEntry, MemoryItem, MemoryPreview, MemorySource, MemoryType,
    };

    fn hit(content: &str, score: f64) -> SearchHit {
        SearchHit {
            item: MemoryItem {
                id: 1,
                item_type: MemoryType::Decision,
                content: content.to_string(),
                content_hash: "h".into(),
                source: MemorySource::Manual,
                source_id: None,
                project_path: "/p".into(),
                created_by: "a".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
                reinforcement_count: 1,
                last_reinforced_at: None,
            },
            score,
            match_source: MatchSource::Hybrid,
        }
    }

    #[test]
    fn project_context_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Widgets\nA thing.").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        let ctx = ProjectContext::new(dir.path());

        let first = ctx.get();
        assert!(first.contains("Widgets"));
        assert!(first.contains("Cargo.toml"));

        // Mutating the directory doesn't change the cached copy.
        std::fs::write(dir.path().join("README.md"), "# Renamed").unwrap();
        assert_eq!(ctx.get(), first);
    }

    #[test]
    fn memory_hits_respect_budget() {
        let hits: Vec<SearchHit> = (0..20).map(|i| hit(&format!("decision {i}"), 0.9)).collect();
        let out = render_memory_hits(&hits, 200, false);
        assert!(out.len() <= 200);
        assert!(out.contains("decision 0"));
    }

    #[test]
    fn memory_hits_details_gated() {
        let hits = vec![hit("Use Postgres everywhere", 0.95)];
        let without = render_memory_hits(&hits, 4_000, false);
        let with = render_memory_hits(&hits, 4_000, true);
        assert!(!without.contains("Detail #"));
        assert!(with.contains("Detail #"));
    }

    #[test]
    fn recent_chat_fills_newest_first_renders_chronological() {
        let messages: Vec<StoredChatMessage> = (0..10)
            .map(|i| StoredChatMessage {
                role: "user".into(),
                content: format!("message number {i} with some padding text"),
                sender_name: "alice".into(),
                timestamp: String::new(),
            })
            .collect();

        let out = render_recent_chat(&messages, 150);
        // Budget keeps only the newest few, but order is chronological.
        assert!(out.contains("message number 9"));
        assert!(!out.contains("message number 0"));
        let idx8 = out.find("message number 8");
        let idx9 = out.find("message number 9");
        if let (Some(a), Some(b)) = (idx8, idx9) {
            assert!(a < b);
        }
    }

    #[test]
    fn memory_index_renders_counts_and_previews() {
        let index = MemoryIndex {
            entries: vec![MemoryIndexEntry {
                item_type: MemoryType::Decision,
                count: 4,
                recent: vec![MemoryPreview {
                    id: 7,
                    preview: "Use Postgres".into(),
                    created_at: "2026-01-01".into(),
                    created_by: "alice".into(),
                }],
            }],
        };
        let out = render_memory_index(&index);
        assert!(out.contains("decision (4 items)"));
        assert!(out.contains("#7 Use Postgres"));
    }
}
