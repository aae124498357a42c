//! The downstream side of a resolver.

use steer_core::Address;

use crate::error::{ResolveError, ResolveResult};

/// A complete address set. Each push replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverState {
    pub addresses: Vec<Address>,
}

/// Receives resolution results; usually the connection pool, which
/// rebuilds its picker from each new state.
pub trait ClientConn: Send + Sync {
    /// Replace the current address set. An `Err` is reported back
    /// through `report_error`.
    fn update_state(&self, state: ResolverState) -> ResolveResult<()>;

    fn report_error(&self, error: ResolveError);
}
