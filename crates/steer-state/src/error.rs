//! Error types for the coordination store.

use thiserror::Error;

/// Result type alias for coordination store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by a coordination store call itself.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),
}
