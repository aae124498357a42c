//! The registry contract consumed by the name resolver.

use async_trait::async_trait;
use tokio::sync::mpsc;

use steer_core::InstanceInfo;

use crate::error::RegistryResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEventKind {
    Put,
    Delete,
}

/// A membership change for a subscribed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    pub kind: RegistryEventKind,
    /// Registry key of the instance that changed.
    pub key: String,
}

/// Delivery channel of a subscription. Yields `None` once the registry
/// closes the subscription.
pub type RegistryEvents = mpsc::Receiver<RegistryEvent>;

#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(&self, instance: &InstanceInfo) -> RegistryResult<()>;

    async fn unregister(&self, instance: &InstanceInfo) -> RegistryResult<()>;

    async fn list_service(&self, service: &str) -> RegistryResult<Vec<InstanceInfo>>;

    async fn subscribe(&self, service: &str) -> RegistryResult<RegistryEvents>;

    /// Cancel every subscription this registry started.
    fn close(&self);
}
