//! Resolver builder and the per-target resolver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use steer_core::config::ResolverConfig;
use steer_core::{CoreResult, Target};
use steer_registry::{Registry, RegistryEvents};

use crate::conn::{ClientConn, ResolverState};
use crate::error::{ResolveError, ResolveResult};

/// Scheme resolvers are registered under unless configured otherwise.
pub const DEFAULT_SCHEME: &str = "registry";

/// Creates one `Resolver` per dial target.
pub struct ResolverBuilder {
    registry: Arc<dyn Registry>,
    scheme: String,
    timeout: Duration,
}

impl ResolverBuilder {
    /// `timeout` bounds every registry lookup.
    pub fn new(registry: Arc<dyn Registry>, timeout: Duration) -> Self {
        Self {
            registry,
            scheme: DEFAULT_SCHEME.to_string(),
            timeout,
        }
    }

    pub fn from_config(registry: Arc<dyn Registry>, config: &ResolverConfig) -> CoreResult<Self> {
        Ok(Self::new(registry, config.timeout()?).with_scheme(&config.scheme))
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Resolve `target` once, push the result to `conn`, then keep it
    /// current in the background until the resolver is closed or dropped.
    ///
    /// Fails only when the target is not ours or the membership
    /// subscription cannot be set up; a failed first lookup is reported
    /// to `conn` like any later one.
    pub async fn build(&self, target: &Target, conn: Arc<dyn ClientConn>) -> ResolveResult<Resolver> {
        if target.scheme != self.scheme {
            return Err(ResolveError::UnsupportedScheme {
                expected: self.scheme.clone(),
                found: target.scheme.clone(),
            });
        }
        let service = target.endpoint.clone();

        // Subscribe before the first lookup so no change slips between them.
        let events = self.registry.subscribe(&service).await.map_err(|source| {
            ResolveError::ResolutionFailed {
                service: service.clone(),
                source,
            }
        })?;

        let inner = Arc::new(ResolverInner {
            service,
            registry: Arc::clone(&self.registry),
            conn,
            timeout: self.timeout,
            resolving: tokio::sync::Mutex::new(()),
        });
        inner.resolve().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_watch_loop(Arc::clone(&inner), events, shutdown_rx));
        info!(service = %inner.service, %target, "resolver started");

        Ok(Resolver {
            inner,
            shutdown: shutdown_tx,
            task,
        })
    }
}

struct ResolverInner {
    service: String,
    registry: Arc<dyn Registry>,
    conn: Arc<dyn ClientConn>,
    timeout: Duration,
    /// Serializes lookup+push so an older state never lands after a newer one.
    resolving: tokio::sync::Mutex<()>,
}

impl ResolverInner {
    async fn resolve(&self) {
        let _guard = self.resolving.lock().await;
        let state = match self.lookup().await {
            Ok(state) => state,
            Err(e) => {
                warn!(service = %self.service, error = %e, "resolution failed");
                self.conn.report_error(e);
                return;
            }
        };
        let count = state.addresses.len();
        match self.conn.update_state(state) {
            Ok(()) => debug!(service = %self.service, addresses = count, "resolver state pushed"),
            Err(e) => {
                warn!(service = %self.service, error = %e, "resolver state rejected");
                self.conn.report_error(e);
            }
        }
    }

    async fn lookup(&self) -> ResolveResult<ResolverState> {
        let listed = tokio::time::timeout(self.timeout, self.registry.list_service(&self.service))
            .await
            .map_err(|_| ResolveError::Timeout {
                service: self.service.clone(),
                timeout: self.timeout,
            })?;
        let instances = listed.map_err(|source| ResolveError::ResolutionFailed {
            service: self.service.clone(),
            source,
        })?;
        Ok(ResolverState {
            addresses: instances.iter().map(|instance| instance.to_address()).collect(),
        })
    }
}

/// Re-resolve on every membership event until shut down or the
/// subscription ends.
async fn run_watch_loop(
    inner: Arc<ResolverInner>,
    mut events: RegistryEvents,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => {
                let Some(event) = received else {
                    debug!(service = %inner.service, "membership subscription closed");
                    break;
                };
                debug!(service = %inner.service, key = %event.key, kind = ?event.kind, "membership changed");
                inner.resolve().await;
            }
            _ = shutdown.changed() => break,
        }
    }
    info!(service = %inner.service, "resolver watch loop stopped");
}

/// A live resolution of one target. Dropping it stops the watch loop.
pub struct Resolver {
    inner: Arc<ResolverInner>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Resolver {
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    /// Re-resolve out of band, pushing the result before returning.
    pub async fn resolve_now(&self) {
        self.inner.resolve().await;
    }

    /// Stop the watch loop. Idempotent.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether the watch loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
