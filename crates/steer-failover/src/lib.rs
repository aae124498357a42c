//! steer-failover — failover markers and takeover arbitration.
//!
//! One coordination-store key per instance,
//! `{prefix}/{name}/{group}/{address}`, encodes the whole lifecycle:
//!
//! ```text
//!   absent ──failover──▶ marked ("") ──try_takeover──▶ claimed (candidate JSON)
//!     ▲                     │                              │
//!     └──────recover────────┴──────────recover─────────────┘
//! ```
//!
//! Concurrent takeovers of the same instance are settled by the store's
//! compare-and-swap; the coordinator holds no lock of its own across
//! processes. Background watches are cancelled by `close`.

pub mod coordinator;
pub mod error;

pub use coordinator::{FailoverCoordinator, FailoverEvent};
pub use error::{FailoverError, FailoverResult};
