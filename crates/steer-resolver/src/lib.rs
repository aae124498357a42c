//! steer-resolver — turns registry membership into address sets.
//!
//! ```text
//!   Registry ──list/subscribe──▶ Resolver ──ResolverState──▶ ClientConn
//!                                  ▲                          (pool +
//!                         resolve_now / close                  picker builder)
//! ```
//!
//! Building a resolver performs one resolution and pushes it downstream
//! before returning, then starts a watch loop that re-resolves the whole
//! service on every membership event. Lookup failures are reported to the
//! `ClientConn` and never replace the last pushed state.

pub mod conn;
pub mod error;
pub mod resolver;

pub use conn::{ClientConn, ResolverState};
pub use error::{ResolveError, ResolveResult};
pub use resolver::{DEFAULT_SCHEME, Resolver, ResolverBuilder};
