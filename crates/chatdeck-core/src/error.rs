use thiserror::Error;

use crate::ai::CompletionError;

/// Failure talking to the record store
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A request the session refuses to carry out
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("a conversation named '{0}' already exists")]
    DuplicateId(String),

    #[error("'{0}' is not a usable conversation name")]
    InvalidId(String),

    #[error("the last remaining conversation cannot be deleted")]
    LastConversation,

    #[error("message is empty")]
    EmptyMessage,

    #[error("a response is still streaming")]
    Busy,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type ChatResult<T> = Result<T, ChatError>;
pub type StoreResult<T> = Result<T, PersistenceError>;
