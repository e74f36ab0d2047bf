use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsforgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("AI provider error: {0}")]
    Provider(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Tool error ({tool}): {reason}")]
    Tool { tool: String, reason: String },

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpsforgeError {
    /// Short error code string for HTTP responses and log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            OpsforgeError::Config(_) => "CONFIG_ERROR",
            OpsforgeError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OpsforgeError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            OpsforgeError::Provider(_) => "PROVIDER_ERROR",
            OpsforgeError::Memory(_) => "MEMORY_ERROR",
            OpsforgeError::Sandbox(_) => "SANDBOX_ERROR",
            OpsforgeError::Tool { .. } => "TOOL_ERROR",
            OpsforgeError::Channel { .. } => "CHANNEL_ERROR",
            OpsforgeError::Serialization(_) => "SERIALIZATION_ERROR",
            OpsforgeError::Io(_) => "IO_ERROR",
            OpsforgeError::Timeout { .. } => "TIMEOUT",
            OpsforgeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OpsforgeError>;
