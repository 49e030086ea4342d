/// Error types for the messaging core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Directory read error: {0}")]
    Directory(String),

    #[error("History load error: {0}")]
    HistoryLoad(String),

    #[error("Send failed: {0}")]
    SendPersist(String),

    #[error("Mutation not persisted: {0}")]
    MutationPersist(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        ChatError::Rejected(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
