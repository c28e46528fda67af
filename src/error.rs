//! Error types for the offline outbox.

use thiserror::Error;

use crate::core::{MessageId, MessageState};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message {0} not found")]
    NotFound(MessageId),

    #[error("Message {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: MessageId,
        from: MessageState,
        to: MessageState,
    },

    #[error("Message {id} reached the retry limit after {attempts} retries")]
    RetryLimitExceeded { id: MessageId, attempts: u32 },

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("{0}")]
    Other(String),
}
