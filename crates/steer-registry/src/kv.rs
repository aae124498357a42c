//! KvRegistry — a registry stored in the coordination store.
//!
//! Registrations are bound to a lease by default (see `lease`), so an
//! instance that stops renewing drops out of its service. Records
//! written without a lease stay until they are unregistered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use steer_core::InstanceInfo;
use steer_core::config::RegistryConfig;
use steer_state::{Compare, CoordinationStore, EventKind, TxnOp, WatchStream};

use crate::error::{RegistryError, RegistryResult};
use crate::lease::{self, DEFAULT_LEASE_TTL, LeaseHandle};
use crate::registry::{Registry, RegistryEvent, RegistryEventKind, RegistryEvents};

/// Stored form of a registration.
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    #[serde(flatten)]
    instance: InstanceInfo,
    /// Lease the record lives under; absent for unleased records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease: Option<String>,
}

/// Records under one service prefix, split by lease state.
#[derive(Default)]
struct Scan {
    live: Vec<InstanceInfo>,
    /// Dead records as `(key, value)`, for compare-and-delete.
    expired: Vec<(String, Vec<u8>)>,
    /// Lapsed lease keys with the value they were read with.
    lapsed_leases: Vec<(String, Vec<u8>)>,
}

/// Registry backed by a `CoordinationStore`.
pub struct KvRegistry {
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    lease_ttl: Duration,
    /// When false, registrations are written without a lease.
    leased: bool,
    lease: Mutex<Option<LeaseHandle>>,
    /// Shutdown senders of every live subscription.
    subscriptions: Mutex<Vec<watch::Sender<bool>>>,
}

impl KvRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
            leased: true,
            lease: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(
        store: Arc<dyn CoordinationStore>,
        config: &RegistryConfig,
    ) -> RegistryResult<Self> {
        Ok(Self::new(store, &config.prefix).with_lease_ttl(config.lease_ttl()?))
    }

    /// Lifetime of this registry's lease. Also sets how often its
    /// subscriptions sweep for dead records.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Write registrations that never expire.
    pub fn without_lease(mut self) -> Self {
        self.leased = false;
        self
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Stop renewing the lease and wait until every registration made
    /// under it has been deleted. Subscriptions are left running.
    pub async fn revoke(&self) {
        let handle = self.lease.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.revoke().await {
                warn!(error = %e, "lease keepalive task failed");
            }
        }
    }

    /// Key prefix shared by every instance of `service`.
    fn service_key(&self, service: &str) -> String {
        format!("{}/{}/", self.prefix, service)
    }

    fn instance_key(&self, instance: &InstanceInfo) -> String {
        format!("{}{}", self.service_key(&instance.name), instance.address)
    }

    /// Sibling of the registry prefix, so lease keys never show up in a
    /// service listing.
    fn lease_root(&self) -> String {
        format!("{}.leases/", self.prefix)
    }

    /// The running lease, granted on first use.
    fn current_lease(&self) -> Arc<lease::Lease> {
        let mut slot = self.lease.lock();
        let handle = slot.get_or_insert_with(|| {
            LeaseHandle::grant(Arc::clone(&self.store), &self.lease_root(), self.lease_ttl)
        });
        Arc::clone(&handle.lease)
    }
}

#[async_trait]
impl Registry for KvRegistry {
    async fn register(&self, instance: &InstanceInfo) -> RegistryResult<()> {
        instance.identity().validate()?;
        let key = self.instance_key(instance);

        let lease = self.leased.then(|| self.current_lease());
        let record = Record {
            instance: instance.clone(),
            lease: lease.as_ref().map(|l| l.id.clone()),
        };
        let value =
            serde_json::to_vec(&record).map_err(|e| RegistryError::Serialize(e.to_string()))?;

        match lease {
            Some(lease) => {
                // The lease must be live before any record points at it.
                lease.refresh(self.store.as_ref()).await?;
                self.store.put(&key, &value).await?;
                lease.hold(key, value);
            }
            None => self.store.put(&key, &value).await?,
        }
        info!(service = %instance.name, address = %instance.address, leased = self.leased, "instance registered");
        Ok(())
    }

    async fn unregister(&self, instance: &InstanceInfo) -> RegistryResult<()> {
        instance.identity().validate()?;
        let key = self.instance_key(instance);
        if let Some(handle) = self.lease.lock().as_ref() {
            handle.lease.forget(&key);
        }
        let existed = self.store.delete(&key).await?;
        info!(service = %instance.name, address = %instance.address, existed, "instance unregistered");
        Ok(())
    }

    async fn list_service(&self, service: &str) -> RegistryResult<Vec<InstanceInfo>> {
        let scan = scan_service(
            self.store.as_ref(),
            &self.service_key(service),
            &self.lease_root(),
            false,
        )
        .await?;
        debug!(%service, count = scan.live.len(), expired = scan.expired.len(), "listed service instances");
        Ok(scan.live)
    }

    async fn subscribe(&self, service: &str) -> RegistryResult<RegistryEvents> {
        let service_key = self.service_key(service);
        let stream = self.store.watch_prefix(&service_key).await?;
        let (events_tx, events_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        {
            let mut subscriptions = self.subscriptions.lock();
            // Drop senders whose subscription loop already ended.
            subscriptions.retain(|tx| !tx.is_closed());
            subscriptions.push(shutdown_tx);
        }

        let sweeper = Sweeper {
            store: Arc::clone(&self.store),
            service_key,
            lease_root: self.lease_root(),
            period: lease::sweep_period(self.lease_ttl),
        };
        let service = service.to_string();
        tokio::spawn(async move {
            run_subscription(&service, stream, sweeper, events_tx, shutdown_rx).await;
        });
        Ok(events_rx)
    }

    /// Ends every subscription and revokes the lease in the background.
    /// Use `revoke` to wait for the registrations to be gone.
    fn close(&self) {
        let mut subscriptions = self.subscriptions.lock();
        for shutdown in subscriptions.drain(..) {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = self.lease.lock().take() {
            drop(handle.revoke());
        }
        debug!("registry closed");
    }
}

/// Read every record under `service_key` and check its lease. With
/// `skip_malformed`, undecodable records are logged and left alone
/// instead of failing the scan.
async fn scan_service(
    store: &dyn CoordinationStore,
    service_key: &str,
    lease_root: &str,
    skip_malformed: bool,
) -> RegistryResult<Scan> {
    let entries = store.get_prefix(service_key).await?;
    let now = lease::now_ms();
    let mut leases: HashMap<String, Option<Vec<u8>>> = HashMap::new();
    let mut scan = Scan::default();

    for (key, value) in entries {
        let record: Record = match serde_json::from_slice(&value) {
            Ok(record) => record,
            Err(e) if skip_malformed => {
                warn!(%key, error = %e, "skipping malformed registry record");
                continue;
            }
            Err(e) => {
                return Err(RegistryError::Deserialize {
                    key,
                    reason: e.to_string(),
                });
            }
        };
        let Some(id) = record.lease else {
            scan.live.push(record.instance);
            continue;
        };
        let lease_key = format!("{lease_root}{id}");
        if !leases.contains_key(&lease_key) {
            let stored = store.get(&lease_key).await?;
            leases.insert(lease_key.clone(), stored);
        }
        let stored = leases.get(&lease_key).and_then(|v| v.as_deref());
        if lease::lease_alive(stored, now) {
            scan.live.push(record.instance);
        } else {
            scan.expired.push((key, value));
        }
    }

    scan.lapsed_leases = leases
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .filter(|(_, value)| !lease::lease_alive(Some(value.as_slice()), now))
        .collect();
    Ok(scan)
}

/// Removes dead records under one service prefix.
struct Sweeper {
    store: Arc<dyn CoordinationStore>,
    service_key: String,
    lease_root: String,
    period: Duration,
}

impl Sweeper {
    /// Compare-and-delete every expired record. Returns how many this
    /// call removed; records another sweeper got to first are skipped.
    async fn sweep(&self) -> RegistryResult<usize> {
        let scan =
            scan_service(self.store.as_ref(), &self.service_key, &self.lease_root, true).await?;
        let mut removed = 0;
        for (key, value) in scan.expired {
            if self
                .store
                .txn(Compare::value_equals(&key, value), vec![TxnOp::delete(&key)])
                .await?
            {
                info!(%key, "expired registration removed");
                removed += 1;
            }
        }
        for (key, value) in scan.lapsed_leases {
            self.store
                .txn(Compare::value_equals(&key, value), vec![TxnOp::delete(&key)])
                .await?;
        }
        Ok(removed)
    }
}

/// Translate store events under one service prefix into registry events,
/// sweeping dead records between them.
async fn run_subscription(
    service: &str,
    mut stream: WatchStream,
    sweeper: Sweeper,
    events: mpsc::Sender<RegistryEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(sweeper.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = stream.recv() => {
                let Some(event) = received else { break };
                let kind = match event.kind {
                    EventKind::Put => RegistryEventKind::Put,
                    EventKind::Delete => RegistryEventKind::Delete,
                };
                tokio::select! {
                    sent = events.send(RegistryEvent { kind, key: event.key }) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = sweeper.sweep().await {
                    warn!(%service, error = %e, "registry sweep failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(%service, "registry subscription finished");
}
