//! steer-balancer — per-call backend selection.
//!
//! Pickers choose one ready connection per call using smooth weighted
//! round-robin (SWRR) over an *efficient* weight that adapts to call
//! outcomes: successes raise it toward twice the configured weight,
//! deadline and unavailable failures collapse it to 1, other errors
//! lower it by one. A degraded node keeps receiving a trickle of calls
//! so it can recover.
//!
//! # Components
//!
//! - **`weighted`** — single-weight picker, adaptive or fixed, and builders
//! - **`rw_weighted`** — read/write split, group-aware picker whose
//!   builder carries node state across rebuilds through a `NodeCache`
//! - **`context`** — call-context carriers (write intent, group affinity)
//! - **`deadline`** — interceptor propagating the caller's deadline
//!
//! Every node record has its own lock; a pick never takes a lock that
//! spans more than one node.

pub mod context;
pub mod deadline;
pub mod error;
pub mod node;
pub mod picker;
pub mod rw_weighted;
pub mod weighted;

pub use context::{CallContext, GroupAffinity, RequestExt, RequestKind};
pub use deadline::{DEADLINE_METADATA_KEY, Deadline, DeadlineInterceptor};
pub use error::PickError;
pub use node::{Outcome, WeightTrack};
pub use picker::{
    CallError, DoneCallback, DoneInfo, PickInfo, PickResult, Picker, PickerBuildInfo,
    PickerBuilder, ReadyConn,
};
pub use rw_weighted::{NodeCache, RwNodeSnapshot, RwWeightedPicker, RwWeightedPickerBuilder};
pub use weighted::{StaticWeightedPickerBuilder, WeightedPicker, WeightedPickerBuilder};
