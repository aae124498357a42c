//! Liveness leases for registry records.
//!
//! A leased registry writes one lease key holding an expiry (Unix ms) and
//! tags every record it registers with the lease id. A keepalive task
//! pushes the expiry forward. Records whose lease key is missing or past
//! its expiry are dead; subscribers sweep them, which turns a crashed
//! server into an ordinary delete event.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use steer_state::{Compare, CoordinationStore, TxnOp};

use crate::error::RegistryResult;

/// Lease lifetime when none is configured.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// Floor for timer periods derived from a lease TTL.
const MIN_TICK: Duration = Duration::from_millis(10);

static NEXT_LEASE: AtomicU64 = AtomicU64::new(0);

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn expiry_after(ttl: Duration) -> Vec<u8> {
    (now_ms() + ttl.as_millis() as u64).to_string().into_bytes()
}

/// Whether a stored lease value is still in force at `now`. A missing or
/// unreadable value is not.
pub(crate) fn lease_alive(value: Option<&[u8]>, now: u64) -> bool {
    value
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|s| s.parse::<u64>().ok())
        .is_some_and(|expires| expires > now)
}

/// Period of the keepalive renewal for `ttl`.
fn renew_period(ttl: Duration) -> Duration {
    (ttl / 3).max(MIN_TICK)
}

/// Period at which subscribers sweep for lapsed leases.
pub(crate) fn sweep_period(ttl: Duration) -> Duration {
    (ttl / 4).max(MIN_TICK)
}

pub(crate) struct Lease {
    pub id: String,
    pub key: String,
    ttl: Duration,
    /// Records written under this lease, by registry key.
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl Lease {
    fn new(lease_root: &str, ttl: Duration) -> Self {
        let id = format!(
            "{:x}-{:x}-{}",
            std::process::id(),
            now_ms(),
            NEXT_LEASE.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            key: format!("{lease_root}{id}"),
            id,
            ttl,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Push the expiry out by one TTL.
    pub async fn refresh(&self, store: &dyn CoordinationStore) -> RegistryResult<()> {
        store.put(&self.key, &expiry_after(self.ttl)).await?;
        Ok(())
    }

    pub fn hold(&self, key: String, value: Vec<u8>) {
        self.records.lock().insert(key, value);
    }

    pub fn forget(&self, key: &str) {
        self.records.lock().remove(key);
    }

    async fn renew(&self, store: &dyn CoordinationStore) -> RegistryResult<()> {
        let alive = lease_alive(store.get(&self.key).await?.as_deref(), now_ms());
        self.refresh(store).await?;
        if alive {
            return Ok(());
        }
        // Sweepers may already have removed our records.
        let records: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        warn!(lease = %self.id, records = records.len(), "lease lapsed before renewal, re-registering");
        for (key, value) in records {
            store.put(&key, &value).await?;
        }
        Ok(())
    }

    /// Delete every record held under the lease, then the lease key.
    async fn revoke(&self, store: &dyn CoordinationStore) {
        let records: Vec<_> = self.records.lock().drain().collect();
        let count = records.len();
        for (key, value) in records {
            // Leave the key alone if someone else has rewritten it since.
            let deleted = store
                .txn(Compare::value_equals(&key, value), vec![TxnOp::delete(&key)])
                .await;
            if let Err(e) = deleted {
                warn!(%key, error = %e, "failed to release registration");
            }
        }
        if let Err(e) = store.delete(&self.key).await {
            warn!(lease = %self.id, error = %e, "failed to delete lease key");
        }
        info!(lease = %self.id, count, "lease revoked");
    }
}

/// A running lease and its keepalive task.
pub(crate) struct LeaseHandle {
    pub lease: Arc<Lease>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LeaseHandle {
    /// Create a lease under `lease_root` and start renewing it.
    pub fn grant(store: Arc<dyn CoordinationStore>, lease_root: &str, ttl: Duration) -> Self {
        let lease = Arc::new(Lease::new(lease_root, ttl));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_keepalive(store, Arc::clone(&lease), shutdown_rx));
        debug!(lease = %lease.id, ttl_ms = ttl.as_millis() as u64, "lease granted");
        Self {
            lease,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Stop renewing; the keepalive task revokes the lease on its way out.
    pub fn revoke(self) -> JoinHandle<()> {
        let _ = self.shutdown.send(true);
        self.task
    }
}

/// Renew `lease` until shutdown.
///
/// An explicit shutdown revokes the lease. If the sender is dropped
/// without one, the lease is abandoned and left to expire, which is
/// what a crashed process looks like to everyone else.
async fn run_keepalive(
    store: Arc<dyn CoordinationStore>,
    lease: Arc<Lease>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(renew_period(lease.ttl));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = lease.renew(store.as_ref()).await {
                    warn!(lease = %lease.id, error = %e, "lease renewal failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_ok() {
                    lease.revoke(store.as_ref()).await;
                } else {
                    debug!(lease = %lease.id, "lease abandoned");
                }
                break;
            }
        }
    }
}
