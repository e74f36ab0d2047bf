//! Dispatcher (layer 1).
//!
//! Classifies each inbound chat message as chat / query_memory /
//! create_task with a small model and a read-only tool set, assembles a
//! budgeted context prompt, and routes the outcome: a card reply, or a task
//! handed to the runner.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use opsforge_core::config::{DispatcherConfig, MemoryIndexMode};
use opsforge_core::truncate::truncate_keep_head;
use opsforge_core::types::ImMessage;
use opsforge_memory::conversations::{chat_message, ConversationLog};
use opsforge_memory::extract::MemoryExtractor;
use opsforge_memory::MemoryEngine;
use opsforge_provider::{AiProvider, ChatMessage, ContentBlock, MessageRequest, StopReason};
use opsforge_channels::platform::{send_with_retry, CardContent, ImPlatform};

use crate::backend::ToolBackend;
use crate::intent::{parse_decision, DispatchDecision, Intent};
use crate::prompt::{
    dispatcher_system_prompt, render_memory_hits, render_memory_index, render_recent_chat,
    ProjectContext,
};

/// Dispatcher tool results above this size are tail-truncated.
const TOOL_RESULT_CAP: usize = 8 * 1024;
/// Recent messages pulled from the conversation log before budget filtering.
const RECENT_FETCH: usize = 30;

const REPROMPT_INSTRUCTION: &str =
    "Your previous reply was cut off. Respond again with ONLY the JSON object \
     (no code fences) and keep taskDescription under 500 characters.";

/// Where created tasks go. The runner implements this; the indirection keeps
/// the dispatcher free of a runner dependency.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn submit(&self, spec: TaskSpec) -> Result<String, String>;
}

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub title: String,
    pub description: String,
    pub created_by: String,
    pub chat_id: Option<String>,
    pub card_message_id: Option<String>,
}

pub struct Dispatcher {
    provider: Arc<dyn AiProvider>,
    model: String,
    config: DispatcherConfig,
    project_path: String,
    project_context: ProjectContext,
    memory: Arc<MemoryEngine>,
    conversations: Arc<ConversationLog>,
    extractor: Arc<MemoryExtractor>,
    tools: Arc<dyn ToolBackend>,
    platform: Arc<dyn ImPlatform>,
    tasks: Arc<dyn TaskSink>,
    intent_patterns: Vec<Regex>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn AiProvider>,
        model: String,
        config: DispatcherConfig,
        project_path: String,
        memory: Arc<MemoryEngine>,
        conversations: Arc<ConversationLog>,
        extractor: Arc<MemoryExtractor>,
        tools: Arc<dyn ToolBackend>,
        platform: Arc<dyn ImPlatform>,
        tasks: Arc<dyn TaskSink>,
    ) -> Self {
        let intent_patterns = config
            .memory_intent_patterns
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect();
        Self {
            provider,
            model,
            project_context: ProjectContext::new(&project_path),
            config,
            project_path,
            memory,
            conversations,
            extractor,
            tools,
            platform,
            tasks,
            intent_patterns,
        }
    }

    /// Passive path: log the message, nothing else.
    pub fn record_message(&self, msg: &ImMessage) {
        self.conversations.append(
            msg.chat_id.as_str(),
            chat_message("user", &msg.text, &msg.sender_name),
        );
    }

    /// Full dispatch for a bot-mention.
    pub async fn dispatch(self: &Arc<Self>, msg: ImMessage) {
        let chat_id = msg.chat_id.as_str().to_string();
        self.record_message(&msg);

        let thinking = CardContent::new("Thinking…");
        let card_id = send_with_retry(|| {
            self.platform
                .send_card(&chat_id, &thinking, Some(&msg.message_id))
        })
        .await
        .flatten();

        let memory_intent = self.has_memory_intent(&msg.text);
        let prompt = self.assemble_prompt(&msg, memory_intent).await;

        let (raw, stop) = match self.run_tool_loop(&prompt).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "dispatcher model call failed");
                self.update_or_send(&chat_id, card_id.as_deref(), "Something went wrong handling that message.")
                    .await;
                return;
            }
        };

        let decision = self.parse_with_reprompt(&prompt, &raw, stop).await;
        debug!(intent = ?decision.intent, "dispatch decision");

        match decision.intent {
            Intent::Chat | Intent::QueryMemory => {
                let reply = decision
                    .reply
                    .unwrap_or_else(|| "(no reply produced)".to_string());
                self.update_or_send(&chat_id, card_id.as_deref(), &reply).await;
                self.conversations
                    .append(&chat_id, chat_message("assistant", &reply, "opsforge"));

                if decision.intent == Intent::Chat {
                    let dispatcher = Arc::clone(self);
                    let chat = chat_id.clone();
                    tokio::spawn(async move {
                        dispatcher
                            .extractor
                            .maybe_extract_conversation(
                                &dispatcher.memory,
                                &dispatcher.conversations,
                                &chat,
                                &dispatcher.project_path,
                            )
                            .await;
                    });
                }
            }
            Intent::CreateTask => {
                let Some(title) = decision.task_title else {
                    let ask =
                        "I can open a task for that, but I need a short title — what should it be called?";
                    self.update_or_send(&chat_id, card_id.as_deref(), ask).await;
                    self.conversations
                        .append(&chat_id, chat_message("assistant", ask, "opsforge"));
                    return;
                };

                let description = build_enriched_description(
                    &msg,
                    decision.task_description.as_deref().unwrap_or(""),
                );

                let spec = TaskSpec {
                    title: title.clone(),
                    description,
                    created_by: msg.sender_name.clone(),
                    chat_id: Some(chat_id.clone()),
                    card_message_id: card_id.clone(),
                };

                match self.tasks.submit(spec).await {
                    Ok(task_id) => {
                        info!(task_id = %task_id, title = %title, "task created from chat");
                        let note = format!("Task created: **{title}** (`{task_id}`)\nI'll post updates here.");
                        self.update_or_send(&chat_id, card_id.as_deref(), &note).await;
                        self.conversations
                            .append(&chat_id, chat_message("assistant", &note, "opsforge"));
                    }
                    Err(e) => {
                        warn!(error = %e, "task submission failed");
                        self.update_or_send(
                            &chat_id,
                            card_id.as_deref(),
                            &format!("Couldn't create the task: {e}"),
                        )
                        .await;
                    }
                }
            }
        }
    }

    fn has_memory_intent(&self, text: &str) -> bool {
        self.intent_patterns.iter().any(|re| re.is_match(text))
    }

    /// Assemble the sectioned prompt under per-section budgets and the
    /// global cap.
    async fn assemble_prompt(&self, msg: &ImMessage, memory_intent: bool) -> String {
        let mut sections: Vec<String> = Vec::new();

        // 1. Project context.
        let project = truncate_keep_head(
            &self.project_context.get(),
            self.config.project_context_budget,
        );
        if !project.is_empty() {
            sections.push(format!("## Project\n{project}"));
        }

        // 2. Memory index (always | auto | never).
        let include_index = match self.config.memory_index_mode {
            MemoryIndexMode::Always => true,
            MemoryIndexMode::Never => false,
            MemoryIndexMode::Auto => memory_intent,
        };
        if include_index {
            if let Ok(index) = self.memory.get_index(&self.project_path) {
                if !index.entries.is_empty() {
                    sections.push(render_memory_index(&index));
                }
            }
        }

        // 3. Two-stage memory context under one budget.
        match self
            .memory
            .search(
                &msg.text,
                &self.project_path,
                self.config.memory_top_k,
                self.config.memory_min_score,
            )
            .await
        {
            Ok(hits) if !hits.is_empty() => {
                let top_score = hits.first().map(|h| h.score).unwrap_or(0.0);
                let include_details =
                    memory_intent || top_score >= self.config.detail_min_score;
                let rendered = render_memory_hits(
                    &hits,
                    self.config.memory_section_budget,
                    include_details,
                );
                if !rendered.is_empty() {
                    sections.push(rendered);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "memory search failed during prompt assembly"),
        }

        // 4. Recent conversation.
        if let Ok(recent) = self
            .conversations
            .get_recent_messages(msg.chat_id.as_str(), RECENT_FETCH)
        {
            let rendered = render_recent_chat(&recent, self.config.recent_chat_budget);
            if !rendered.is_empty() {
                sections.push(rendered);
            }
        }

        // 5. The new message, file refs, detected links.
        let mut current = format!("## New message from {}\n{}", msg.sender_name, msg.text);
        let files: Vec<&opsforge_core::types::Attachment> = msg
            .attachments
            .iter()
            .filter(|a| !a.is_image())
            .collect();
        if !files.is_empty() {
            current.push_str("\n\nAttached files:");
            for file in files {
                current.push_str(&format!("\n- {} ({})", file.name, file.path));
            }
        }
        if !msg.links.is_empty() {
            current.push_str("\n\nDetected links:");
            for link in &msg.links {
                current.push_str(&format!("\n- [{}] {}", link.kind, link.url));
            }
        }
        sections.push(current);

        truncate_keep_head(&sections.join("\n\n"), self.config.max_prompt_chars)
    }

    /// Read-only tool loop. Ends on end_turn or a tool-free response;
    /// results over 8 KB are tail-truncated before being fed back.
    async fn run_tool_loop(&self, prompt: &str) -> Result<(String, StopReason), String> {
        let mut messages = vec![ChatMessage::user_text(prompt)];
        let mut collected = String::new();
        let mut last_stop = StopReason::EndTurn;

        for round in 0..self.config.max_rounds.max(1) {
            let request = MessageRequest {
                model: self.model.clone(),
                system: dispatcher_system_prompt(),
                messages: messages.clone(),
                tools: self.tools.specs(),
                max_tokens: 2_048,
                temperature: None,
            };

            let response = self
                .provider
                .create_message(&request)
                .await
                .map_err(|e| e.to_string())?;

            collected.push_str(&response.text());
            last_stop = response.stop_reason;

            let tool_uses: Vec<(String, String, serde_json::Value)> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if tool_uses.is_empty() || response.stop_reason == StopReason::EndTurn {
                return Ok((collected, last_stop));
            }

            debug!(round, tools = tool_uses.len(), "dispatcher tool round");
            messages.push(ChatMessage::assistant(response.content.clone()));

            let mut results = Vec::new();
            for (id, name, input) in tool_uses {
                let result = self.tools.call(&name, input).await;
                let content = truncate_keep_head(&result.content, TOOL_RESULT_CAP);
                results.push(ContentBlock::tool_result(id, content, result.is_error));
            }
            messages.push(ChatMessage::user_blocks(results));
        }

        Ok((collected, last_stop))
    }

    /// Parse the model output; on a truncated reply, re-prompt once with a
    /// JSON-only instruction; a second failure degrades to chat.
    async fn parse_with_reprompt(
        &self,
        prompt: &str,
        raw: &str,
        stop: StopReason,
    ) -> DispatchDecision {
        if let Some(decision) = parse_decision(raw) {
            return decision;
        }

        if stop == StopReason::MaxTokens {
            debug!("dispatcher reply truncated, re-prompting once");
            let request = MessageRequest {
                model: self.model.clone(),
                system: dispatcher_system_prompt(),
                messages: vec![
                    ChatMessage::user_text(prompt),
                    ChatMessage::assistant(vec![ContentBlock::text(raw)]),
                    ChatMessage::user_text(REPROMPT_INSTRUCTION),
                ],
                tools: Vec::new(),
                max_tokens: 1_024,
                temperature: None,
            };
            if let Ok(response) = self.provider.create_message(&request).await {
                if let Some(decision) = parse_decision(&response.text()) {
                    return decision;
                }
            }
        }

        DispatchDecision::fallback_chat(raw)
    }

    async fn update_or_send(&self, chat_id: &str, card_id: Option<&str>, text: &str) {
        let card = CardContent::new(text);
        match card_id {
            Some(id) => {
                let updated = send_with_retry(|| self.platform.update_card(id, &card))
                    .await
                    .unwrap_or(false);
                if !updated {
                    send_with_retry(|| self.platform.send_text(chat_id, text, None)).await;
                }
            }
            None => {
                send_with_retry(|| self.platform.send_text(chat_id, text, None)).await;
            }
        }
    }
}

/// Requested-by header + model description + reference links + attachments.
pub fn build_enriched_description(msg: &ImMessage, ai_description: &str) -> String {
    let mut out = format!("Requested by: {}", msg.sender_name);
    if !ai_description.trim().is_empty() {
        out.push_str("\n\n");
        out.push_str(ai_description.trim());
    }
    if !msg.links.is_empty() {
        out.push_str("\n\nReference links:");
        for link in &msg.links {
            out.push_str(&format!("\n- [{}] {}", link.kind, link.url));
        }
    }
    if !msg.attachments.is_empty() {
        out.push_str("\n\nAttachments:");
        for attachment in &msg.attachments {
            out.push_str(&format!("\n- {}: {}", attachment.name, attachment.path));
        }
    }
    out
}
