//! Failover error types.

use thiserror::Error;

pub type FailoverResult<T> = Result<T, FailoverError>;

/// Failures of failover operations. Losing a takeover race is not one of
/// them: `try_takeover` reports it as `Ok(false)`.
#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("invalid instance: {0}")]
    Invalid(#[from] steer_core::CoreError),

    #[error("no failover in progress for {instance}")]
    TakeoverUnavailable { instance: String },

    #[error("{instance} is already taken over by {claimant}")]
    AlreadyClaimed { instance: String, claimant: String },

    #[error("coordination error: {0}")]
    Coordination(#[from] steer_state::StateError),

    #[error("encoding claim failed: {0}")]
    Encode(String),

    #[error("claim on {instance} does not decode: {reason}")]
    MalformedClaim { instance: String, reason: String },
}
