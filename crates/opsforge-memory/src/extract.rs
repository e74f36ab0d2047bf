//! Incremental memory extraction through a dedicated (cheap) model.
//!
//! Two feeds: conversation shards once enough unextracted messages pile up,
//! and task lifecycle events (input on creation, result + thinking on
//! completion, issue on failure).

use std::sync::Arc;

use tracing::{debug, info, warn};

use opsforge_core::types::Task;
use opsforge_provider::{AiProvider, ChatMessage, MessageRequest};

use crate::conversations::ConversationLog;
use crate::engine::MemoryEngine;
use crate::types::{MemorySource, MemoryType, NewMemoryItem};

/// Prompt head kept for `task_input` items.
const TASK_INPUT_HEAD: usize = 500;

const EXTRACTION_SYSTEM: &str = "You distill team chat into project memory. \
From the conversation below, extract durable facts worth remembering: \
decisions made, important context, stated preferences, known issues. \
Ignore small talk, greetings, and anything already implied by the code. \
Return ONLY a JSON array, no prose, no code fences. Each element: \
{\"type\":\"decision|context|preference|issue\",\"content\":\"one self-contained sentence\"}. \
Maximum 10 items. Return [] when nothing qualifies.";

pub struct MemoryExtractor {
    provider: Arc<dyn AiProvider>,
    model: String,
    threshold: usize,
}

impl MemoryExtractor {
    pub fn new(provider: Arc<dyn AiProvider>, model: String, threshold: usize) -> Self {
        Self {
            provider,
            model,
            threshold,
        }
    }

    /// Extract from a chat's current shard when the unextracted backlog has
    /// reached the threshold. The watermark advances even when the model
    /// response doesn't parse, so a bad reply can't wedge the shard.
    pub async fn maybe_extract_conversation(
        &self,
        engine: &Arc<MemoryEngine>,
        log: &Arc<ConversationLog>,
        chat_id: &str,
        project_path: &str,
    ) {
        let shard = ConversationLog::current_shard(chat_id);
        let (up_to, unseen) = log.unextracted(&shard);
        if unseen.len() < self.threshold {
            return;
        }

        info!(
            chat_id,
            backlog = unseen.len(),
            "conversation extraction triggered"
        );

        let transcript: String = unseen
            .iter()
            .map(|m| format!("{} ({}): {}", m.role.to_uppercase(), m.sender_name, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let new_watermark = up_to + unseen.len();

        match self.run_extraction(&transcript).await {
            Ok(items) => {
                let mut saved = 0usize;
                for (item_type, content) in items {
                    let outcome = engine.add_item(NewMemoryItem {
                        item_type,
                        content,
                        source: MemorySource::Conversation,
                        source_id: Some(chat_id.to_string()),
                        project_path: project_path.to_string(),
                        created_by: "memory-extractor".to_string(),
                    });
                    if outcome.is_ok() {
                        saved += 1;
                    }
                }
                debug!(chat_id, saved, "conversation extraction saved items");
            }
            Err(e) => warn!(chat_id, error = %e, "conversation extraction failed; skipping batch"),
        }

        if let Err(e) = log.mark_extracted(&shard, new_watermark) {
            warn!(chat_id, error = %e, "failed to advance extraction watermark");
        }
    }

    /// Record the task request itself as memory.
    pub fn on_task_created(&self, engine: &Arc<MemoryEngine>, task: &Task, project_path: &str) {
        let head: String = task.prompt.chars().take(TASK_INPUT_HEAD).collect();
        let _ = engine.add_item(NewMemoryItem {
            item_type: MemoryType::TaskInput,
            content: format!("{} requested: {}", task.created_by, head),
            source: MemorySource::Task,
            source_id: Some(task.id.to_string()),
            project_path: project_path.to_string(),
            created_by: task.created_by.clone(),
        });
    }

    /// Record the outcome and mine the executor's thinking for new memory.
    pub async fn on_task_completed(
        &self,
        engine: &Arc<MemoryEngine>,
        task: &Task,
        project_path: &str,
    ) {
        let Some(summary) = &task.summary else {
            return;
        };

        let content = if summary.modified_files.is_empty() {
            summary.thinking.clone()
        } else {
            format!(
                "{}\nModified files: {}",
                summary.thinking,
                summary.modified_files.join(", ")
            )
        };
        let _ = engine.add_item(NewMemoryItem {
            item_type: MemoryType::TaskResult,
            content,
            source: MemorySource::Task,
            source_id: Some(task.id.to_string()),
            project_path: project_path.to_string(),
            created_by: task.created_by.clone(),
        });

        if summary.thinking.trim().is_empty() {
            return;
        }
        match self.run_extraction(&summary.thinking).await {
            Ok(items) => {
                for (item_type, content) in items {
                    let _ = engine.add_item(NewMemoryItem {
                        item_type,
                        content,
                        source: MemorySource::Task,
                        source_id: Some(task.id.to_string()),
                        project_path: project_path.to_string(),
                        created_by: "memory-extractor".to_string(),
                    });
                }
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "task thinking extraction failed"),
        }
    }

    /// Record a failure as an issue memory.
    pub fn on_task_failed(&self, engine: &Arc<MemoryEngine>, task: &Task, project_path: &str) {
        let head: String = task.prompt.chars().take(200).collect();
        let error = task.error.as_deref().unwrap_or("unknown error");
        let _ = engine.add_item(NewMemoryItem {
            item_type: MemoryType::Issue,
            content: format!("Task failed: {} — {}", head, error),
            source: MemorySource::Task,
            source_id: Some(task.id.to_string()),
            project_path: project_path.to_string(),
            created_by: task.created_by.clone(),
        });
    }

    async fn run_extraction(
        &self,
        text: &str,
    ) -> Result<Vec<(MemoryType, String)>, String> {
        let mut req = MessageRequest::new(&self.model, EXTRACTION_SYSTEM);
        req.max_tokens = 1024;
        req.messages.push(ChatMessage::user_text(format!(
            "Extract memory items from:\n\n{}",
            text
        )));

        let resp = self
            .provider
            .create_message(&req)
            .await
            .map_err(|e| e.to_string())?;

        parse_extraction_items(&resp.text()).ok_or_else(|| "unparseable extraction reply".to_string())
    }
}

/// Pull a JSON array of `{type, content}` items out of a model reply that
/// may be wrapped in prose or a code fence. Invalid elements are skipped.
pub fn parse_extraction_items(raw: &str) -> Option<Vec<(MemoryType, String)>> {
    let raw = raw.trim();
    let json_str = match (raw.find('['), raw.rfind(']')) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    };

    let values: Vec<serde_json::Value> = serde_json::from_str(json_str).ok()?;
    let mut out = Vec::new();
    for value in values {
        let Some(type_str) = value.get("type").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(content) = value.get("content").and_then(|v| v.as_str()) else {
            continue;
        };
        let Ok(item_type) = type_str.parse::<MemoryType>() else {
            continue;
        };
        if content.trim().is_empty() {
            continue;
        }
        out.push((item_type, content.to_string()));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array() {
        let items = parse_extraction_items(
            r#"[{"type":"decision","content":"Use Postgres."},{"type":"issue","content":"CI flaky."}]"#,
        )
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, MemoryType::Decision);
    }

    #[test]
    fn parses_array_wrapped_in_prose_and_fence() {
        let raw = "Here you go:\n```json\n[{\"type\":\"preference\",\"content\":\"Tabs.\"}]\n```\nDone.";
        let items = parse_extraction_items(raw).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].1, "Tabs.");
    }

    #[test]
    fn skips_invalid_elements() {
        let raw = r#"[{"type":"decision","content":"keep"},{"type":"nonsense","content":"drop"},{"content":"no type"},{"type":"issue","content":""}]"#;
        let items = parse_extraction_items(raw).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].1, "keep");
    }

    #[test]
    fn garbage_returns_none() {
        assert!(parse_extraction_items("I could not find anything.").is_none());
    }

    #[test]
    fn empty_array_is_ok() {
        assert_eq!(parse_extraction_items("[]").unwrap().len(), 0);
    }
}
