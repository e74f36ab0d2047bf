use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("item not found: {id}")]
    NotFound { id: i64 },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("extraction state regression: {shard} {from} -> {to}")]
    StateRegression {
        shard: String,
        from: usize,
        to: usize,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
