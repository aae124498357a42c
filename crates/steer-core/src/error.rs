//! Errors shared by every steer crate.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid param: {0}")]
    InvalidParam(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("config error: {0}")]
    Config(String),
}
