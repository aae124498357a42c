//! steer-registry — service registry for steer.
//!
//! Servers publish an `InstanceInfo` under their service name; clients
//! list a service's instances and subscribe to membership changes. The
//! `Registry` trait is what the name resolver consumes. `KvRegistry`
//! implements it on any `CoordinationStore`, one JSON record per
//! instance at `{prefix}/{service}/{address}`, each bound to a lease
//! that the registering process keeps alive.

pub mod error;
pub mod kv;
mod lease;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use kv::KvRegistry;
pub use lease::DEFAULT_LEASE_TTL;
pub use registry::{Registry, RegistryEvent, RegistryEventKind, RegistryEvents};
