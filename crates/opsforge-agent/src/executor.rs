//! Executor (layer 2) — a bounded tool-calling session.
//!
//! The loop honors two hard budgets: iterations and estimated context
//! tokens. It recovers locally from the common failure modes: oversized
//! context (trim and continue), provider-truncated tool calls (synthesized
//! error results, never executed), and repeated tool failures (hint, then a
//! forced reassessment).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opsforge_core::truncate::{truncate_for_trim, truncate_head_tail, TRIM_REWRITE_THRESHOLD};
use opsforge_provider::retry::{with_retry, RetryPolicy};
use opsforge_provider::{
    AiProvider, ChatMessage, ContentBlock, MessageRequest, ProviderError, StopReason,
};

use crate::backend::ToolBackend;

/// Messages kept at the tail on a normal context trim.
const TRIM_KEEP_TAIL: usize = 10;
/// Consecutive tool failures before an extra hint is injected.
const ERROR_HINT_AT: u32 = 3;
/// Consecutive tool failures that force a reassessment.
const ERROR_REASSESS_AT: u32 = 5;

/// Canonical self-correction text for a provider-truncated tool call.
const TRUNCATED_TOOL_CALL_MSG: &str =
    "your previous response was truncated before the tool call was complete; \
     the call was not executed. Retry with smaller content per call.";

const REASSESS_MSG: &str =
    "Several tool calls in a row have failed. Stop and reassess: re-read the \
     task, check the paths and arguments you are using, and take a different \
     approach before trying more tool calls.";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub model: String,
    /// Iteration budget per session.
    pub max_iterations: usize,
    /// Extension rounds granted after the budget runs out.
    pub extension_budget: usize,
    /// Estimated-token ceiling for the message history.
    pub max_context_tokens: usize,
    /// Per-tool-result truncation budget (chars).
    pub max_tool_result_chars: usize,
    /// Provider max_tokens per call.
    pub max_output_tokens: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_iterations: 50,
            extension_budget: 3,
            max_context_tokens: 160_000,
            max_tool_result_chars: 30_000,
            max_output_tokens: 8_192,
        }
    }
}

/// One streamed chunk through the output sink.
#[derive(Debug, Clone)]
pub enum OutputChunk {
    Text(String),
    ToolStart { name: String },
    ToolEnd { name: String, is_error: bool },
}

pub type OutputSink = Arc<dyn Fn(OutputChunk) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("session cancelled")]
    Cancelled,
}

pub struct Executor {
    provider: Arc<dyn AiProvider>,
    backend: Arc<dyn ToolBackend>,
    config: ExecutorConfig,
    retry: RetryPolicy,
    on_output: OutputSink,
    cancel: CancellationToken,
}

struct Session {
    system: String,
    messages: Vec<ChatMessage>,
    consecutive_tool_errors: u32,
    collected: String,
}

enum Step {
    Done,
    Continue,
}

impl Executor {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        backend: Arc<dyn ToolBackend>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            config,
            retry: RetryPolicy::default(),
            // Default sink writes to stdout; the runner injects its own.
            on_output: Arc::new(|chunk| {
                if let OutputChunk::Text(text) = chunk {
                    print!("{text}");
                }
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_output(mut self, sink: OutputSink) -> Self {
        self.on_output = sink;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run a session to completion (or budget exhaustion) and return the
    /// accumulated assistant text.
    pub async fn execute(&self, system: &str, prompt: &str) -> Result<String, ExecutorError> {
        let mut session = Session {
            system: system.to_string(),
            messages: vec![ChatMessage::user_text(prompt)],
            consecutive_tool_errors: 0,
            collected: String::new(),
        };

        for iteration in 0..self.config.max_iterations {
            debug!(iteration, "executor iteration");
            if let Step::Done = self.run_iteration(&mut session).await? {
                return Ok(session.collected);
            }
        }

        // Budget exhausted: trim harder and grant bonus iterations, up to
        // the extension budget.
        for extension in 0..self.config.extension_budget {
            let keep_tail = 10usize.saturating_sub(2 * extension).max(4);
            warn!(extension, keep_tail, "iteration budget exhausted, extending");
            aggressive_trim(&mut session.messages, keep_tail);

            let bonus = (self.config.max_iterations / 2).max(1);
            for iteration in 0..bonus {
                debug!(extension, iteration, "executor extension iteration");
                if let Step::Done = self.run_iteration(&mut session).await? {
                    return Ok(session.collected);
                }
            }
        }

        warn!("executor gave up after all extensions");
        session
            .collected
            .push_str("\n\n[warning: the session hit its iteration budget before finishing; the work above may be incomplete]");
        Ok(session.collected)
    }

    async fn run_iteration(&self, session: &mut Session) -> Result<Step, ExecutorError> {
        trim_context(&mut session.messages, self.config.max_context_tokens);

        // Provider call; context overflow is recovered in-place with a
        // harder trim instead of consuming the iteration.
        let response = loop {
            match self.call_provider(session).await {
                Ok(response) => break response,
                Err(ExecutorError::Provider(err)) if err.is_context_overflow() => {
                    warn!("provider reported context overflow, trimming aggressively");
                    aggressive_trim(&mut session.messages, 4);
                }
                Err(err) => return Err(err),
            }
        };

        let mut tool_uses: Vec<(String, String, serde_json::Value)> = Vec::new();
        for block in &response.content {
            match block {
                ContentBlock::Text { text } => {
                    session.collected.push_str(text);
                    (self.on_output)(OutputChunk::Text(text.clone()));
                }
                ContentBlock::ToolUse { id, name, input } => {
                    tool_uses.push((id.clone(), name.clone(), input.clone()));
                }
                _ => {}
            }
        }

        // A max_tokens stop with tool_use blocks means the provider cut the
        // response mid-call: the inputs cannot be trusted, so nothing is
        // executed. The model is told to retry smaller.
        if response.stop_reason == StopReason::MaxTokens && !tool_uses.is_empty() {
            info!(tools = tool_uses.len(), "truncated tool call detected, self-correcting");
            session
                .messages
                .push(ChatMessage::assistant(response.content.clone()));
            let results: Vec<ContentBlock> = tool_uses
                .iter()
                .map(|(id, _, _)| ContentBlock::tool_result(id, TRUNCATED_TOOL_CALL_MSG, true))
                .collect();
            session.messages.push(ChatMessage::user_blocks(results));
            return Ok(Step::Continue);
        }

        session
            .messages
            .push(ChatMessage::assistant(response.content.clone()));

        if tool_uses.is_empty() || response.stop_reason == StopReason::EndTurn {
            return Ok(Step::Done);
        }

        // Execute strictly sequentially, in emission order.
        let mut result_blocks: Vec<ContentBlock> = Vec::new();
        for (id, name, input) in &tool_uses {
            (self.on_output)(OutputChunk::ToolStart { name: name.clone() });
            let result = self.backend.call(name, input.clone()).await;
            (self.on_output)(OutputChunk::ToolEnd {
                name: name.clone(),
                is_error: result.is_error,
            });

            if result.is_error {
                session.consecutive_tool_errors += 1;
                let content = format!(
                    "Tool '{}' failed.\nArguments: {}\nError: {}\nCheck the arguments and adjust before retrying.",
                    name, input, result.content
                );
                result_blocks.push(ContentBlock::tool_result(id, content, true));
            } else {
                session.consecutive_tool_errors = 0;
                let truncated =
                    truncate_head_tail(&result.content, self.config.max_tool_result_chars, name);
                result_blocks.push(ContentBlock::tool_result(id, truncated, false));
            }
        }

        if (ERROR_HINT_AT..ERROR_REASSESS_AT).contains(&session.consecutive_tool_errors) {
            result_blocks.push(ContentBlock::text(
                "Hint: the last few tool calls all failed. Double-check file paths \
                 against list_files output before the next call.",
            ));
        }

        session.messages.push(ChatMessage::user_blocks(result_blocks));

        if session.consecutive_tool_errors >= ERROR_REASSESS_AT {
            warn!(
                errors = session.consecutive_tool_errors,
                "too many consecutive tool failures, forcing reassessment"
            );
            session.messages.push(ChatMessage::user_text(REASSESS_MSG));
            session.consecutive_tool_errors = 0;
        }

        Ok(Step::Continue)
    }

    async fn call_provider(
        &self,
        session: &Session,
    ) -> Result<opsforge_provider::MessageResponse, ExecutorError> {
        let request = MessageRequest {
            model: self.config.model.clone(),
            system: session.system.clone(),
            messages: session.messages.clone(),
            tools: self.backend.specs(),
            max_tokens: self.config.max_output_tokens,
            temperature: None,
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ExecutorError::Cancelled),
            result = with_retry(&self.retry, || self.provider.create_message(&request)) => {
                result.map_err(ExecutorError::from)
            }
        }
    }
}

/// Estimated tokens across the whole history (ceil(chars/4) per block).
pub fn estimate_context_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.estimate_tokens()).sum()
}

/// Standard trim: when over budget, keep the first message (the task prompt)
/// plus the last [`TRIM_KEEP_TAIL`]; if still over, rewrite long tool
/// results. Returns true when anything was trimmed.
pub fn trim_context(messages: &mut Vec<ChatMessage>, max_tokens: usize) -> bool {
    let before = estimate_context_tokens(messages);
    if before <= max_tokens {
        return false;
    }

    if messages.len() > TRIM_KEEP_TAIL + 1 {
        let tail_start = messages.len() - TRIM_KEEP_TAIL;
        messages.drain(1..tail_start);
    }

    if estimate_context_tokens(messages) > max_tokens {
        rewrite_long_tool_results(messages);
    }

    debug!(
        before,
        after = estimate_context_tokens(messages),
        "context trimmed"
    );
    true
}

/// Extension-time trim: keep first + last `keep_tail` and rewrite long tool
/// results unconditionally.
pub fn aggressive_trim(messages: &mut Vec<ChatMessage>, keep_tail: usize) {
    if messages.len() > keep_tail + 1 {
        let tail_start = messages.len() - keep_tail;
        messages.drain(1..tail_start);
    }
    rewrite_long_tool_results(messages);
}

fn rewrite_long_tool_results(messages: &mut [ChatMessage]) {
    for message in messages {
        for block in &mut message.content {
            if let ContentBlock::ToolResult { content, .. } = block {
                if content.len() > TRIM_REWRITE_THRESHOLD {
                    *content = truncate_for_trim(content);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opsforge_provider::{MessageResponse, ToolSpec, Usage};
    use opsforge_tools::ToolResult;
    use std::sync::Mutex;

    /// Scripted provider: pops responses front-to-back, records requests.
    struct ScriptedProvider {
        responses: Mutex<Vec<MessageResponse>>,
        requests: Mutex<Vec<MessageRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<MessageResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn create_message(
            &self,
            req: &MessageRequest,
        ) -> Result<MessageResponse, ProviderError> {
            self.requests.lock().unwrap().push(req.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                // Ran out of script: end the session.
                return Ok(text_response("done", StopReason::EndTurn));
            }
            Ok(responses.remove(0))
        }
    }

    struct RecordingBackend {
        calls: Mutex<Vec<(String, serde_json::Value)>>,
        fail: bool,
    }

    impl RecordingBackend {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl ToolBackend for RecordingBackend {
        fn specs(&self) -> Vec<ToolSpec> {
            vec![ToolSpec {
                name: "write_file".into(),
                description: "write".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }]
        }
        async fn call(&self, name: &str, args: serde_json::Value) -> ToolResult {
            self.calls.lock().unwrap().push((name.to_string(), args));
            if self.fail {
                ToolResult::error("disk on fire")
            } else {
                ToolResult::success("ok")
            }
        }
    }

    fn text_response(text: &str, stop: StopReason) -> MessageResponse {
        MessageResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: stop,
            usage: Some(Usage::default()),
        }
    }

    fn tool_response(id: &str, name: &str, stop: StopReason) -> MessageResponse {
        MessageResponse {
            content: vec![ContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
                input: serde_json::json!({"path": "a.txt", "content": "hi"}),
            }],
            stop_reason: stop,
            usage: None,
        }
    }

    fn executor(provider: Arc<ScriptedProvider>, backend: Arc<RecordingBackend>) -> Executor {
        Executor::new(provider, backend, ExecutorConfig::default())
            .with_output(Arc::new(|_| {}))
    }

    #[tokio::test]
    async fn plain_text_session_completes() {
        let provider = ScriptedProvider::new(vec![text_response("all set", StopReason::EndTurn)]);
        let backend = RecordingBackend::new(false);
        let exec = executor(provider.clone(), backend.clone());

        let out = exec.execute("sys", "do it").await.unwrap();
        assert_eq!(out, "all set");
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_calls_execute_then_finish() {
        let provider = ScriptedProvider::new(vec![
            tool_response("t1", "write_file", StopReason::ToolUse),
            text_response("finished", StopReason::EndTurn),
        ]);
        let backend = RecordingBackend::new(false);
        let exec = executor(provider.clone(), backend.clone());

        let out = exec.execute("sys", "do it").await.unwrap();
        assert_eq!(out, "finished");
        assert_eq!(backend.calls.lock().unwrap().len(), 1);

        // The follow-up request carries the tool_result.
        let requests = provider.requests.lock().unwrap();
        let second = &requests[1];
        let has_result = second.messages.iter().any(|m| {
            m.content
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolResult { is_error: false, .. }))
        });
        assert!(has_result);
    }

    #[tokio::test]
    async fn truncated_tool_call_is_never_executed() {
        let provider = ScriptedProvider::new(vec![
            tool_response("t1", "write_file", StopReason::MaxTokens),
            text_response("recovered", StopReason::EndTurn),
        ]);
        let backend = RecordingBackend::new(false);
        let exec = executor(provider.clone(), backend.clone());

        let out = exec.execute("sys", "do it").await.unwrap();
        assert_eq!(out, "recovered");
        assert!(
            backend.calls.lock().unwrap().is_empty(),
            "no tool may run on a truncated call"
        );

        let requests = provider.requests.lock().unwrap();
        let second = &requests[1];
        let synthesized = second
            .messages
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|b| match b {
                ContentBlock::ToolResult {
                    content, is_error, ..
                } => Some((content.clone(), *is_error)),
                _ => None,
            })
            .expect("synthesized tool_result present");
        assert!(synthesized.1);
        assert!(synthesized.0.contains("truncated"));
    }

    #[tokio::test]
    async fn five_consecutive_errors_force_reassessment() {
        let script: Vec<MessageResponse> = (0..6)
            .map(|i| tool_response(&format!("t{i}"), "write_file", StopReason::ToolUse))
            .collect();
        let provider = ScriptedProvider::new(script);
        let backend = RecordingBackend::new(true);
        let exec = executor(provider.clone(), backend.clone());

        exec.execute("sys", "do it").await.unwrap();

        let requests = provider.requests.lock().unwrap();
        let reassessed = requests.iter().any(|req| {
            req.messages.iter().any(|m| {
                m.content.iter().any(|b| match b {
                    ContentBlock::Text { text } => text.contains("reassess"),
                    _ => false,
                })
            })
        });
        assert!(reassessed, "reassessment message injected after 5 failures");
    }

    #[tokio::test]
    async fn budget_exhaustion_appends_warning() {
        // An endless tool loop against a tiny budget.
        let script: Vec<MessageResponse> = (0..100)
            .map(|i| tool_response(&format!("t{i}"), "write_file", StopReason::ToolUse))
            .collect();
        let provider = ScriptedProvider::new(script);
        let backend = RecordingBackend::new(false);
        let config = ExecutorConfig {
            max_iterations: 2,
            extension_budget: 1,
            ..Default::default()
        };
        let exec = Executor::new(provider, backend, config).with_output(Arc::new(|_| {}));

        let out = exec.execute("sys", "loop forever").await.unwrap();
        assert!(out.contains("iteration budget"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_session() {
        let provider = ScriptedProvider::new(vec![]);
        let backend = RecordingBackend::new(false);
        let token = CancellationToken::new();
        token.cancel();
        let exec = Executor::new(provider, backend, ExecutorConfig::default())
            .with_output(Arc::new(|_| {}))
            .with_cancel(token);

        let result = exec.execute("sys", "do it").await;
        assert!(matches!(result, Err(ExecutorError::Cancelled)));
    }

    #[test]
    fn trim_keeps_first_and_last_ten() {
        let mut messages = vec![ChatMessage::user_text("task prompt")];
        for i in 0..30 {
            messages.push(ChatMessage::user_text("x".repeat(4_000) + &i.to_string()));
        }
        let trimmed = trim_context(&mut messages, 1_000);
        assert!(trimmed);
        assert_eq!(messages.len(), TRIM_KEEP_TAIL + 1);
        // First message survives verbatim.
        assert!(matches!(
            &messages[0].content[0],
            ContentBlock::Text { text } if text == "task prompt"
        ));
    }

    #[test]
    fn trim_noop_under_budget() {
        let mut messages = vec![ChatMessage::user_text("small")];
        assert!(!trim_context(&mut messages, 1_000));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn trim_rewrites_long_tool_results() {
        let mut messages = vec![ChatMessage::user_text("task")];
        for _ in 0..12 {
            messages.push(ChatMessage::user_blocks(vec![ContentBlock::tool_result(
                "t1",
                "y".repeat(20_000),
                false,
            )]));
        }
        trim_context(&mut messages, 100);
        let any_rewritten = messages.iter().any(|m| {
            m.content.iter().any(|b| match b {
                ContentBlock::ToolResult { content, .. } => content.contains("trimmed"),
                _ => false,
            })
        });
        assert!(any_rewritten);
    }

    #[test]
    fn every_nonempty_block_counts_at_least_one_token() {
        let msg = ChatMessage::user_blocks(vec![
            ContentBlock::text("a"),
            ContentBlock::text("bb"),
        ]);
        assert_eq!(msg.estimate_tokens(), 2);
    }
}
