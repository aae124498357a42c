//! Resolver error types.

use std::time::Duration;

use thiserror::Error;

use steer_registry::RegistryError;

pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unsupported target scheme {found:?}, expected {expected:?}")]
    UnsupportedScheme { expected: String, found: String },

    #[error("resolving {service} failed: {source}")]
    ResolutionFailed {
        service: String,
        #[source]
        source: RegistryError,
    },

    #[error("resolving {service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("resolver state rejected: {0}")]
    Rejected(String),
}
