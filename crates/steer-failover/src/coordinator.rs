//! FailoverCoordinator — failover state kept in a coordination store.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use steer_core::config::FailoverConfig;
use steer_core::{CoreError, CoreResult, ServiceInstance};
use steer_state::{Compare, CoordinationStore, EventKind, TxnOp, WatchStream};

use crate::error::{FailoverError, FailoverResult};

/// A failed instance has been claimed by an undertaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverEvent {
    /// The failed instance, parsed from the record key.
    pub instance: ServiceInstance,
    /// The undertaker, when the record value decodes.
    pub claimant: Option<ServiceInstance>,
}

pub struct FailoverCoordinator {
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    /// Shutdown senders of every watch this coordinator started.
    watches: Mutex<Vec<watch::Sender<bool>>>,
}

impl FailoverCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            watches: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(store: Arc<dyn CoordinationStore>, config: &FailoverConfig) -> Self {
        Self::new(store, &config.prefix)
    }

    /// Record key of `instance`.
    pub fn key(&self, instance: &ServiceInstance) -> String {
        format!(
            "{}/{}/{}/{}",
            self.prefix, instance.name, instance.group, instance.address
        )
    }

    /// Recover the instance identity from a record key.
    pub fn parse_key(&self, key: &str) -> CoreResult<ServiceInstance> {
        parse_key(&self.prefix, key)
    }

    /// Mark `instance` as failed. Idempotent; also clears an existing claim.
    pub async fn failover(&self, instance: &ServiceInstance) -> FailoverResult<()> {
        instance.validate()?;
        let key = self.key(instance);
        self.store.put(&key, b"").await?;
        info!(%key, "instance marked for failover");
        Ok(())
    }

    /// Clear the marker of `instance`. Idempotent.
    pub async fn recover(&self, instance: &ServiceInstance) -> FailoverResult<()> {
        instance.validate()?;
        let key = self.key(instance);
        let existed = self.store.delete(&key).await?;
        info!(%key, existed, "instance recovered");
        Ok(())
    }

    /// Stream of takeover claims under this coordinator's prefix.
    ///
    /// Only puts with a non-empty value are reported: marking an instance
    /// produces no event, a successful takeover does.
    pub async fn watch_failover(&self) -> FailoverResult<mpsc::Receiver<FailoverEvent>> {
        let stream = self.store.watch_prefix(&format!("{}/", self.prefix)).await?;
        let (events_tx, events_rx) = mpsc::channel(1);
        let shutdown = self.register_watch();

        let prefix = self.prefix.clone();
        tokio::spawn(async move {
            run_failover_watch(&prefix, stream, events_tx, shutdown).await;
            debug!(%prefix, "failover watch stopped");
        });
        Ok(events_rx)
    }

    /// Yields once each time the marker of `instance` is deleted. The
    /// channel closes when the watch stops.
    pub async fn watch_recover(&self, instance: &ServiceInstance) -> FailoverResult<mpsc::Receiver<()>> {
        instance.validate()?;
        let key = self.key(instance);
        let stream = self.store.watch(&key).await?;
        let (events_tx, events_rx) = mpsc::channel(1);
        let shutdown = self.register_watch();

        tokio::spawn(async move {
            run_recover_watch(stream, events_tx, shutdown).await;
            debug!(%key, "recover watch stopped");
        });
        Ok(events_rx)
    }

    /// Claim the failed instance for `candidate`.
    ///
    /// Returns `Ok(true)` when this call's claim committed and `Ok(false)`
    /// when a concurrent claim won the race.
    pub async fn try_takeover(
        &self,
        failed: &ServiceInstance,
        candidate: &ServiceInstance,
    ) -> FailoverResult<bool> {
        failed.validate()?;
        candidate.validate()?;
        let key = self.key(failed);

        let Some(value) = self.store.get(&key).await? else {
            return Err(FailoverError::TakeoverUnavailable {
                instance: failed.to_string(),
            });
        };
        if !value.is_empty() {
            return Err(FailoverError::AlreadyClaimed {
                instance: failed.to_string(),
                claimant: describe_claim(&value),
            });
        }

        let claim =
            serde_json::to_vec(candidate).map_err(|e| FailoverError::Encode(e.to_string()))?;
        let committed = self
            .store
            .txn(Compare::value_equals(&key, Vec::new()), vec![TxnOp::put(&key, claim)])
            .await?;
        if committed {
            info!(%key, candidate = %candidate, "takeover claimed");
        } else {
            debug!(%key, candidate = %candidate, "takeover lost to a concurrent claim");
        }
        Ok(committed)
    }

    /// Current undertaker of `instance`; `None` when unmarked or unclaimed.
    ///
    /// A claim that does not decode is still a claim, so it is reported as
    /// `MalformedClaim` rather than `None`.
    pub async fn claimant(&self, instance: &ServiceInstance) -> FailoverResult<Option<ServiceInstance>> {
        instance.validate()?;
        let key = self.key(instance);
        let Some(value) = self.store.get(&key).await? else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&value)
            .map(Some)
            .map_err(|e| FailoverError::MalformedClaim {
                instance: instance.to_string(),
                reason: e.to_string(),
            })
    }

    /// Cancel every watch started by this coordinator. Markers stay.
    pub fn close(&self) {
        let mut watches = self.watches.lock();
        let count = watches.len();
        for shutdown in watches.drain(..) {
            let _ = shutdown.send(true);
        }
        debug!(count, "failover watches closed");
    }

    fn register_watch(&self) -> watch::Receiver<bool> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut watches = self.watches.lock();
        // Drop senders whose watch loop already ended.
        watches.retain(|tx| !tx.is_closed());
        watches.push(shutdown_tx);
        shutdown_rx
    }
}

fn parse_key(prefix: &str, key: &str) -> CoreResult<ServiceInstance> {
    let invalid = || CoreError::InvalidParam(format!("invalid failover key: {key}"));
    let rest = key
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(invalid)?;
    let segments: Vec<&str> = rest.split('/').collect();
    let [name, group, address] = segments[..] else {
        return Err(invalid());
    };
    let instance = ServiceInstance::new(name, group, address);
    instance.validate()?;
    Ok(instance)
}

fn describe_claim(value: &[u8]) -> String {
    match serde_json::from_slice::<ServiceInstance>(value) {
        Ok(claimant) => claimant.to_string(),
        Err(_) => String::from_utf8_lossy(value).into_owned(),
    }
}

async fn run_failover_watch(
    prefix: &str,
    mut stream: WatchStream,
    events: mpsc::Sender<FailoverEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = stream.recv() => {
                let Some(event) = received else { break };
                if event.kind != EventKind::Put || event.value.is_empty() {
                    continue;
                }
                let instance = match parse_key(prefix, &event.key) {
                    Ok(instance) => instance,
                    Err(e) => {
                        warn!(key = %event.key, error = %e, "skipping malformed failover key");
                        continue;
                    }
                };
                let claimant = serde_json::from_slice(&event.value).ok();
                tokio::select! {
                    sent = events.send(FailoverEvent { instance, claimant }) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_recover_watch(
    mut stream: WatchStream,
    events: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = stream.recv() => {
                let Some(event) = received else { break };
                if event.kind != EventKind::Delete {
                    continue;
                }
                tokio::select! {
                    sent = events.send(()) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use steer_state::KvStore;

    const PREFIX: &str = "/config/failover";

    fn setup() -> (KvStore, FailoverCoordinator) {
        let store = KvStore::open_in_memory().unwrap();
        let coordinator = FailoverCoordinator::new(Arc::new(store.clone()), PREFIX);
        (store, coordinator)
    }

    fn failed() -> ServiceInstance {
        ServiceInstance::new("notify", "east", "10.0.0.1:80")
    }

    fn candidate() -> ServiceInstance {
        ServiceInstance::new("notify", "east", "10.0.0.2:80")
    }

    async fn recv_within<T>(rx: &mut mpsc::Receiver<T>) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
    }

    // ── Keys ──

    #[test]
    fn key_round_trips() {
        let (_, coordinator) = setup();
        let key = coordinator.key(&failed());
        assert_eq!(key, "/config/failover/notify/east/10.0.0.1:80");
        assert_eq!(coordinator.parse_key(&key).unwrap(), failed());
    }

    #[test]
    fn empty_group_keeps_its_segment() {
        let (_, coordinator) = setup();
        let instance = ServiceInstance::new("notify", "", "10.0.0.1:80");
        let key = coordinator.key(&instance);
        assert_eq!(key, "/config/failover/notify//10.0.0.1:80");
        assert_eq!(coordinator.parse_key(&key).unwrap(), instance);
    }

    #[test]
    fn parse_key_rejects_malformed() {
        let (_, coordinator) = setup();
        assert!(coordinator.parse_key("/config/failover/notify").is_err());
        assert!(coordinator.parse_key("/config/failover/a/b/c/d").is_err());
        assert!(coordinator.parse_key("/elsewhere/a/b/c").is_err());
        assert!(coordinator.parse_key("/config/failover//b/c").is_err());
    }

    // ── Markers ──

    #[tokio::test]
    async fn failover_is_idempotent() {
        let (store, coordinator) = setup();
        coordinator.failover(&failed()).await.unwrap();
        coordinator.failover(&failed()).await.unwrap();

        let value = store.get(&coordinator.key(&failed())).await.unwrap();
        assert_eq!(value, Some(Vec::new()));
    }

    #[tokio::test]
    async fn recover_is_idempotent() {
        let (store, coordinator) = setup();
        coordinator.failover(&failed()).await.unwrap();
        coordinator.recover(&failed()).await.unwrap();
        coordinator.recover(&failed()).await.unwrap();

        assert_eq!(store.get(&coordinator.key(&failed())).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_instance_is_rejected() {
        let (_, coordinator) = setup();
        let bad = ServiceInstance::new("notify", "a/b", "10.0.0.1:80");
        let err = coordinator.failover(&bad).await.unwrap_err();
        assert!(matches!(err, FailoverError::Invalid(_)));

        let err = coordinator
            .try_takeover(&failed(), &ServiceInstance::new("", "", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FailoverError::Invalid(_)));
    }

    // ── Takeover ──

    #[tokio::test]
    async fn takeover_requires_a_marker() {
        let (_, coordinator) = setup();
        let err = coordinator
            .try_takeover(&failed(), &candidate())
            .await
            .unwrap_err();
        assert!(matches!(err, FailoverError::TakeoverUnavailable { .. }));
    }

    #[tokio::test]
    async fn takeover_stores_candidate_identity() {
        let (store, coordinator) = setup();
        coordinator.failover(&failed()).await.unwrap();
        assert!(coordinator.try_takeover(&failed(), &candidate()).await.unwrap());

        let value = store
            .get(&coordinator.key(&failed()))
            .await
            .unwrap()
            .unwrap();
        let stored: ServiceInstance = serde_json::from_slice(&value).unwrap();
        assert_eq!(stored, candidate());
        assert_eq!(coordinator.claimant(&failed()).await.unwrap(), Some(candidate()));
    }

    #[tokio::test]
    async fn second_takeover_sees_existing_claim() {
        let (_, coordinator) = setup();
        coordinator.failover(&failed()).await.unwrap();
        assert!(coordinator.try_takeover(&failed(), &candidate()).await.unwrap());

        let other = ServiceInstance::new("notify", "east", "10.0.0.3:80");
        let err = coordinator.try_takeover(&failed(), &other).await.unwrap_err();
        match err {
            FailoverError::AlreadyClaimed { claimant, .. } => {
                assert_eq!(claimant, candidate().to_string());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn claimant_is_none_until_claimed() {
        let (_, coordinator) = setup();
        assert_eq!(coordinator.claimant(&failed()).await.unwrap(), None);
        coordinator.failover(&failed()).await.unwrap();
        assert_eq!(coordinator.claimant(&failed()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn undecodable_claim_is_an_error_not_absence() {
        let (store, coordinator) = setup();
        store
            .put(&coordinator.key(&failed()), b"not json")
            .await
            .unwrap();

        let err = coordinator.claimant(&failed()).await.unwrap_err();
        assert!(matches!(err, FailoverError::MalformedClaim { .. }));
        // A takeover treats the same record as claimed.
        let err = coordinator
            .try_takeover(&failed(), &candidate())
            .await
            .unwrap_err();
        assert!(matches!(err, FailoverError::AlreadyClaimed { .. }));
    }

    #[tokio::test]
    async fn failover_after_claim_reopens_takeover() {
        let (_, coordinator) = setup();
        coordinator.failover(&failed()).await.unwrap();
        assert!(coordinator.try_takeover(&failed(), &candidate()).await.unwrap());

        coordinator.failover(&failed()).await.unwrap();
        assert_eq!(coordinator.claimant(&failed()).await.unwrap(), None);
        assert!(coordinator.try_takeover(&failed(), &candidate()).await.unwrap());
    }

    // ── Watches ──

    #[tokio::test]
    async fn watch_failover_reports_claims_only() {
        let (_, coordinator) = setup();
        let mut events = coordinator.watch_failover().await.unwrap();

        coordinator.failover(&failed()).await.unwrap();
        assert!(coordinator.try_takeover(&failed(), &candidate()).await.unwrap());

        let event = recv_within(&mut events).await.unwrap();
        assert_eq!(
            event,
            FailoverEvent {
                instance: failed(),
                claimant: Some(candidate()),
            }
        );
    }

    #[tokio::test]
    async fn watch_failover_skips_malformed_keys() {
        let (store, coordinator) = setup();
        let mut events = coordinator.watch_failover().await.unwrap();

        store.put("/config/failover/garbage", b"claimed").await.unwrap();
        coordinator.failover(&failed()).await.unwrap();
        coordinator.try_takeover(&failed(), &candidate()).await.unwrap();

        let event = recv_within(&mut events).await.unwrap();
        assert_eq!(event.instance, failed());
    }

    #[tokio::test]
    async fn watch_recover_fires_on_delete() {
        let (_, coordinator) = setup();
        coordinator.failover(&failed()).await.unwrap();
        let mut recovered = coordinator.watch_recover(&failed()).await.unwrap();

        coordinator.recover(&failed()).await.unwrap();
        assert_eq!(recv_within(&mut recovered).await, Some(()));
    }

    #[tokio::test]
    async fn slow_consumer_receives_every_claim_in_order() {
        let (_, coordinator) = setup();
        let mut events = coordinator.watch_failover().await.unwrap();

        let instances: Vec<_> = (0..50)
            .map(|i| ServiceInstance::new("notify", "east", format!("10.0.1.{i}:80")))
            .collect();
        // Nothing is read until every claim has committed.
        for instance in &instances {
            coordinator.failover(instance).await.unwrap();
            assert!(coordinator.try_takeover(instance, &candidate()).await.unwrap());
        }

        for instance in &instances {
            let event = recv_within(&mut events).await.unwrap();
            assert_eq!(&event.instance, instance);
            assert_eq!(event.claimant, Some(candidate()));
        }
    }

    #[tokio::test]
    async fn finished_watches_are_pruned() {
        let (_, coordinator) = setup();
        for _ in 0..4 {
            let events = coordinator.watch_failover().await.unwrap();
            drop(events);
        }
        coordinator.failover(&failed()).await.unwrap();
        coordinator.try_takeover(&failed(), &candidate()).await.unwrap();
        // Each dropped consumer ends its loop on the next delivery attempt.
        tokio::time::timeout(Duration::from_secs(2), async {
            while coordinator.watches.lock().iter().any(|tx| !tx.is_closed()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let _live = coordinator.watch_failover().await.unwrap();
        assert_eq!(coordinator.watches.lock().len(), 1);
    }

    #[tokio::test]
    async fn close_ends_every_watch() {
        let (store, coordinator) = setup();
        let mut claims = coordinator.watch_failover().await.unwrap();
        let mut recovered = coordinator.watch_recover(&failed()).await.unwrap();

        coordinator.failover(&failed()).await.unwrap();
        coordinator.close();

        assert_eq!(recv_within(&mut claims).await, None);
        assert_eq!(recv_within(&mut recovered).await, None);
        // Markers are left in place.
        assert!(store.get(&coordinator.key(&failed())).await.unwrap().is_some());
    }
}
