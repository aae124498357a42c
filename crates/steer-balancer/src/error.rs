//! Picker error types.

use thiserror::Error;

/// Why a pick produced no connection.
///
/// Both variants mean "no backend available" to the transport; they
/// differ only so diagnostics can tell an empty pool from a group filter
/// that matched nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("no backend available in group {group:?}")]
    NoMatchingGroup { group: String },
}

impl From<PickError> for tonic::Status {
    fn from(err: PickError) -> Self {
        tonic::Status::unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_variants_surface_as_unavailable() {
        let empty: tonic::Status = PickError::NoBackendAvailable.into();
        let filtered: tonic::Status = PickError::NoMatchingGroup {
            group: "b".to_string(),
        }
        .into();

        assert_eq!(empty.code(), tonic::Code::Unavailable);
        assert_eq!(filtered.code(), tonic::Code::Unavailable);
        assert!(filtered.message().contains("\"b\""));
    }
}
