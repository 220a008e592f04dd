/// Error types for the chat engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("No active room")]
    NoActiveRoom,
}

pub type Result<T> = std::result::Result<T, ChatError>;
