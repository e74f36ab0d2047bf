use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (opsforge.toml + OPSFORGE_* env overrides + the
/// recognized plain env vars, which win over everything).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpsforgeConfig {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub im: ImConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// "anthropic" or "openai".
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
    /// Small model the Dispatcher classifies with.
    #[serde(default = "default_dispatcher_model")]
    pub dispatcher_model: String,
    /// Heavyweight model the Executor runs tool loops with.
    #[serde(default = "default_task_model")]
    pub task_model: String,
    /// Model used for memory extraction.
    #[serde(default = "default_memory_model")]
    pub memory_model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            base_url: None,
            dispatcher_model: default_dispatcher_model(),
            task_model: default_task_model(),
            memory_model: default_memory_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Path to the target git repository this process operates on.
    #[serde(default = "default_project_path")]
    pub path: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: default_project_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret required in the `x-webhook-secret` header.
    #[serde(default)]
    pub secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImConfig {
    /// "feishu" or "slack". Empty disables the chat channel.
    #[serde(default)]
    pub platform: String,
    pub feishu: Option<FeishuConfig>,
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    pub app_id: String,
    pub app_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub bot_token: String,
    pub app_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_dir")]
    pub base_dir: String,
    /// Explicit dependency install command; overrides lockfile detection.
    pub setup_command: Option<String>,
    #[serde(default = "bool_true")]
    pub auto_create_pr: bool,
    #[serde(default)]
    pub pr_draft: bool,
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_dir: default_sandbox_dir(),
            setup_command: None,
            auto_create_pr: true,
            pr_draft: false,
            github_token: None,
            gitlab_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Unextracted-message count that triggers conversation extraction.
    #[serde(default = "default_extract_threshold")]
    pub extract_threshold: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            extract_threshold: default_extract_threshold(),
        }
    }
}

/// When the memory index section is included in the dispatcher prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryIndexMode {
    Always,
    #[default]
    Auto,
    Never,
}

impl std::str::FromStr for MemoryIndexMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "always" => Ok(Self::Always),
            "auto" => Ok(Self::Auto),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown memory index mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Hard ceiling across all assembled sections.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_project_context_budget")]
    pub project_context_budget: usize,
    #[serde(default = "default_memory_section_budget")]
    pub memory_section_budget: usize,
    #[serde(default = "default_recent_chat_budget")]
    pub recent_chat_budget: usize,
    #[serde(default = "default_memory_top_k")]
    pub memory_top_k: usize,
    #[serde(default = "default_memory_min_score")]
    pub memory_min_score: f64,
    /// Hybrid-search score above which full detail blocks are included.
    #[serde(default = "default_detail_min_score")]
    pub detail_min_score: f64,
    #[serde(default)]
    pub memory_index_mode: MemoryIndexMode,
    /// Tool-loop round budget for the dispatcher profile.
    #[serde(default = "default_dispatcher_rounds")]
    pub max_rounds: usize,
    /// Regexes that mark a message as asking about past context
    /// ("之前", "did we", ...). Used by the `auto` memory index mode.
    #[serde(default = "default_memory_intent_patterns")]
    pub memory_intent_patterns: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
            project_context_budget: default_project_context_budget(),
            memory_section_budget: default_memory_section_budget(),
            recent_chat_budget: default_recent_chat_budget(),
            memory_top_k: default_memory_top_k(),
            memory_min_score: default_memory_min_score(),
            detail_min_score: default_detail_min_score(),
            memory_index_mode: MemoryIndexMode::default(),
            max_rounds: default_dispatcher_rounds(),
            memory_intent_patterns: default_memory_intent_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_dispatcher_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_task_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_memory_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_project_path() -> String {
    ".".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_sandbox_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.opsforge/sandboxes", home)
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_extract_threshold() -> usize {
    5
}
fn default_max_prompt_chars() -> usize {
    24_000
}
fn default_project_context_budget() -> usize {
    6_000
}
fn default_memory_section_budget() -> usize {
    4_000
}
fn default_recent_chat_budget() -> usize {
    4_000
}
fn default_memory_top_k() -> usize {
    5
}
fn default_memory_min_score() -> f64 {
    0.25
}
fn default_detail_min_score() -> f64 {
    0.6
}
fn default_dispatcher_rounds() -> usize {
    4
}
fn default_memory_intent_patterns() -> Vec<String> {
    [
        "之前", "上次", "还记得", "记得", "previous", "previously", "last time",
        "did we", "have we", "earlier", "remember", "decided",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn bool_true() -> bool {
    true
}

impl OpsforgeConfig {
    /// Load config from a TOML file with OPSFORGE_* overrides, then apply
    /// the recognized plain env vars (AI_API_KEY, WEBHOOK_PORT, ...), which
    /// take precedence over both.
    pub fn load(config_path: Option<&str>) -> crate::Result<Self> {
        let path = config_path.unwrap_or("opsforge.toml");

        let mut config: OpsforgeConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("OPSFORGE_").split("__"))
            .extract()
            .map_err(|e| crate::OpsforgeError::Config(e.to_string()))?;

        config.apply_recognized_env();
        Ok(config)
    }

    /// Apply the flat environment variables this process documents.
    pub fn apply_recognized_env(&mut self) {
        let get = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(v) = get("AI_PROVIDER") {
            self.ai.provider = v;
        }
        if let Some(v) = get("AI_API_KEY") {
            self.ai.api_key = v;
        }
        if let Some(v) = get("AI_BASE_URL") {
            self.ai.base_url = Some(v);
        }
        if let Some(v) = get("DISPATCHER_MODEL") {
            self.ai.dispatcher_model = v;
        }
        if let Some(v) = get("TASK_MODEL") {
            self.ai.task_model = v;
        }
        if let Some(v) = get("MEMORY_MODEL") {
            self.ai.memory_model = v;
        }
        if let Some(v) = get("TARGET_PROJECT_PATH") {
            self.project.path = v;
        }
        if let Some(v) = get("WEBHOOK_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = get("WEBHOOK_SECRET") {
            self.server.secret = v;
        }
        if let Some(v) = get("IM_PLATFORM") {
            self.im.platform = v;
        }
        if let (Some(id), Some(secret)) = (get("FEISHU_APP_ID"), get("FEISHU_APP_SECRET")) {
            self.im.feishu = Some(FeishuConfig {
                app_id: id,
                app_secret: secret,
            });
        }
        if let Some(token) = get("SLACK_BOT_TOKEN") {
            self.im.slack = Some(SlackConfig {
                bot_token: token,
                app_token: get("SLACK_APP_TOKEN"),
            });
        }
        if let Some(v) = get("SANDBOX_BASE_DIR") {
            self.sandbox.base_dir = v;
        }
        if let Some(v) = get("SANDBOX_SETUP_COMMAND") {
            self.sandbox.setup_command = Some(v);
        }
        if let Some(v) = get("AUTO_CREATE_PR") {
            self.sandbox.auto_create_pr = v != "false" && v != "0";
        }
        if let Some(v) = get("PR_DRAFT") {
            self.sandbox.pr_draft = v == "true" || v == "1";
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.sandbox.github_token = Some(v);
        }
        if let Some(v) = get("GITLAB_TOKEN") {
            self.sandbox.gitlab_token = Some(v);
        }
        if let Some(v) = get("MEMORY_EXTRACT_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.memory.extract_threshold = v;
        }
        if let Some(v) = get("DISPATCHER_PROJECT_BUDGET_CHARS").and_then(|v| v.parse().ok()) {
            self.dispatcher.project_context_budget = v;
        }
        if let Some(v) = get("DISPATCHER_MEMORY_BUDGET_CHARS").and_then(|v| v.parse().ok()) {
            self.dispatcher.memory_section_budget = v;
        }
        if let Some(v) = get("DISPATCHER_CHAT_BUDGET_CHARS").and_then(|v| v.parse().ok()) {
            self.dispatcher.recent_chat_budget = v;
        }
        if let Some(v) = get("DISPATCHER_MEMORY_TOP_K").and_then(|v| v.parse().ok()) {
            self.dispatcher.memory_top_k = v;
        }
        if let Some(v) = get("DISPATCHER_MEMORY_MIN_SCORE").and_then(|v| v.parse().ok()) {
            self.dispatcher.memory_min_score = v;
        }
        if let Some(v) = get("DISPATCHER_MEMORY_INDEX_MODE").and_then(|v| v.parse().ok()) {
            self.dispatcher.memory_index_mode = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = get("LOG_FILE") {
            self.log.file = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OpsforgeConfig::default();
        assert_eq!(config.ai.provider, "anthropic");
        assert_eq!(config.memory.extract_threshold, 5);
        assert_eq!(config.dispatcher.memory_index_mode, MemoryIndexMode::Auto);
        assert!(config.sandbox.auto_create_pr);
        assert!(!config.sandbox.pr_draft);
    }

    #[test]
    fn memory_index_mode_parses() {
        assert_eq!("always".parse::<MemoryIndexMode>().unwrap(), MemoryIndexMode::Always);
        assert_eq!("never".parse::<MemoryIndexMode>().unwrap(), MemoryIndexMode::Never);
        assert!("sometimes".parse::<MemoryIndexMode>().is_err());
    }
}
