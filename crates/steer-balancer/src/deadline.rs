//! Deadline propagation to backends.
//!
//! Servers behind the pickers read the caller's absolute deadline from
//! the `key_timeout` metadata entry, in Unix milliseconds, and can shed
//! work the caller has already given up on.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::trace;

/// Metadata key carrying the absolute deadline.
pub const DEADLINE_METADATA_KEY: &str = "key_timeout";

/// Absolute deadline of a call, stored in the request's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(pub SystemTime);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline(SystemTime::now() + timeout)
    }

    pub fn unix_millis(&self) -> u128 {
        self.0
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }
}

/// Appends `key_timeout` to requests that carry a `Deadline`.
///
/// Requests without a deadline pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineInterceptor;

impl Interceptor for DeadlineInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let Some(deadline) = request.extensions().get::<Deadline>().copied() else {
            return Ok(request);
        };
        let millis = deadline.unix_millis();
        let value: MetadataValue<Ascii> = millis
            .to_string()
            .parse()
            .map_err(|_| Status::internal("deadline is not valid metadata"))?;
        request.metadata_mut().append(DEADLINE_METADATA_KEY, value);
        trace!(deadline_ms = %millis, "propagating deadline");
        Ok(request)
    }
}
