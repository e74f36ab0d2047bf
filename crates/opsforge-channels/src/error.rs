use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({platform}): {message}")]
    Api { platform: String, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed event: {0}")]
    Event(String),
}
