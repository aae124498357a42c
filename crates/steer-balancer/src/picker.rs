//! Picker contracts shared by every balancing policy.

use std::sync::Arc;

use steer_core::Address;

use crate::context::CallContext;
use crate::error::PickError;
use crate::node::Outcome;

/// Per-call input to a pick.
#[derive(Debug, Clone, Copy)]
pub struct PickInfo<'a> {
    /// Full RPC method name, e.g. `/notify.Notifier/Send`.
    pub method: &'a str,
    pub ctx: &'a CallContext,
}

impl<'a> PickInfo<'a> {
    pub fn new(method: &'a str, ctx: &'a CallContext) -> Self {
        Self { method, ctx }
    }
}

/// Why a call failed, as reported back to the picker.
#[derive(Debug, Clone)]
pub enum CallError {
    /// The caller's own deadline expired before a response arrived.
    DeadlineExceeded,
    /// The call completed with a non-OK status.
    Status(tonic::Status),
}

/// Completion report for a picked call.
#[derive(Debug, Clone, Default)]
pub struct DoneInfo {
    pub error: Option<CallError>,
}

impl DoneInfo {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn deadline_exceeded() -> Self {
        Self {
            error: Some(CallError::DeadlineExceeded),
        }
    }

    pub fn status(status: tonic::Status) -> Self {
        Self {
            error: Some(CallError::Status(status)),
        }
    }

    /// Map the report onto a weight adjustment.
    pub fn outcome(&self) -> Outcome {
        match &self.error {
            None => Outcome::Success,
            Some(CallError::DeadlineExceeded) => Outcome::Quarantine,
            Some(CallError::Status(status)) => match status.code() {
                tonic::Code::DeadlineExceeded | tonic::Code::Unavailable => Outcome::Quarantine,
                _ => Outcome::Degrade,
            },
        }
    }
}

/// Invoked exactly once when the picked call finishes.
pub type DoneCallback = Box<dyn FnOnce(DoneInfo) + Send + 'static>;

/// A successful pick.
pub struct PickResult<C> {
    pub conn: C,
    pub done: DoneCallback,
}

impl<C: std::fmt::Debug> std::fmt::Debug for PickResult<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PickResult")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

/// Chooses one ready connection per call. Safe to call concurrently.
pub trait Picker<C>: Send + Sync {
    fn pick(&self, info: PickInfo<'_>) -> Result<PickResult<C>, PickError>;
}

/// A ready connection and the resolved address it was dialed from.
#[derive(Debug, Clone)]
pub struct ReadyConn<C> {
    pub conn: C,
    pub address: Address,
}

/// The set of ready connections a picker is built over.
#[derive(Debug, Clone)]
pub struct PickerBuildInfo<C> {
    pub ready: Vec<ReadyConn<C>>,
}

impl<C> PickerBuildInfo<C> {
    pub fn new(ready: Vec<ReadyConn<C>>) -> Self {
        Self { ready }
    }
}

/// Builds a fresh picker whenever the ready set changes.
pub trait PickerBuilder<C>: Send + Sync {
    fn build(&self, info: PickerBuildInfo<C>) -> Arc<dyn Picker<C>>;
}
