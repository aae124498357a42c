//! Registry error types.

use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid instance: {0}")]
    Invalid(#[from] steer_core::CoreError),

    #[error("coordination store error: {0}")]
    Store(#[from] steer_state::StateError),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("malformed registry record at {key}: {reason}")]
    Deserialize { key: String, reason: String },
}
