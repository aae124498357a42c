//! KvStore — redb-backed coordination store.
//!
//! All writes go through one commit path that holds a lock across the redb
//! commit and the publication of the resulting events, so watchers see
//! changes in commit order. Compare-and-swap transactions evaluate their
//! guard inside the same redb write transaction that applies them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::coordination::{
    Compare, CoordinationStore, TxnOp, WatchEvent, WatchFeed, WatchStream, watch_channel,
};
use crate::error::{StateError, StateResult};
use crate::tables::KV;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Thread-safe coordination store backed by redb.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
    events: broadcast::Sender<WatchEvent>,
    commit_lock: Arc<Mutex<()>>,
}

impl KvStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        Self::open_with_buffer(path, DEFAULT_EVENT_BUFFER)
    }

    /// Open a persistent store with a custom watch event buffer.
    pub fn open_with_buffer(path: &Path, event_buffer: usize) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db, event_buffer)?;
        debug!(?path, "coordination store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db, DEFAULT_EVENT_BUFFER)?;
        debug!("in-memory coordination store opened");
        Ok(store)
    }

    fn from_database(db: Database, event_buffer: usize) -> StateResult<Self> {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let store = Self {
            db: Arc::new(db),
            events,
            commit_lock: Arc::new(Mutex::new(())),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create the table if it doesn't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(KV).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Apply `ops` if `guard` holds (or unconditionally without one).
    ///
    /// Returns `None` when the guard failed, otherwise the number of
    /// changes committed (a delete of an absent key is not a change).
    fn commit(&self, guard: Option<&Compare>, ops: &[TxnOp]) -> StateResult<Option<usize>> {
        let _serialized = self.commit_lock.lock();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;

        let applied = {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;

            let holds = match guard {
                Some(Compare::ValueEquals { key, value }) => {
                    let current = table
                        .get(key.as_str())
                        .map_err(map_err!(Read))?
                        .map(|v| v.value().to_vec());
                    current.as_deref() == Some(value.as_slice())
                }
                None => true,
            };

            if holds {
                let mut events = Vec::with_capacity(ops.len());
                for op in ops {
                    match op {
                        TxnOp::Put { key, value } => {
                            table
                                .insert(key.as_str(), value.as_slice())
                                .map_err(map_err!(Write))?;
                            events.push(WatchEvent::put(key.as_str(), value.as_slice()));
                        }
                        TxnOp::Delete { key } => {
                            let existed =
                                table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
                            if existed {
                                events.push(WatchEvent::delete(key.as_str()));
                            }
                        }
                    }
                }
                Some(events)
            } else {
                None
            }
        };

        let Some(events) = applied else {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(None);
        };
        txn.commit().map_err(map_err!(Transaction))?;

        let changes = events.len();
        for event in events {
            // No receivers is fine: nobody is watching.
            let _ = self.events.send(event);
        }
        Ok(Some(changes))
    }

    fn read(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn read_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        // Keys sort lexicographically, so matches are one contiguous run.
        for entry in table.range::<&str>(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            results.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(results)
    }

    /// Subscribe before returning so no commit after this call is missed.
    fn spawn_watch(&self, filter: KeyFilter) -> WatchStream {
        let (feed, stream) = watch_channel();
        let source = self.events.subscribe();
        debug!(?filter, "store watch started");
        tokio::spawn(forward_events(filter, source, feed));
        stream
    }
}

#[async_trait]
impl CoordinationStore for KvStore {
    async fn put(&self, key: &str, value: &[u8]) -> StateResult<()> {
        self.commit(None, &[TxnOp::put(key, value)])?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        self.read(key)
    }

    async fn get_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        self.read_prefix(prefix)
    }

    async fn delete(&self, key: &str) -> StateResult<bool> {
        let changes = self.commit(None, &[TxnOp::delete(key)])?;
        Ok(changes.is_some_and(|n| n > 0))
    }

    async fn watch(&self, key: &str) -> StateResult<WatchStream> {
        Ok(self.spawn_watch(KeyFilter::Exact(key.to_string())))
    }

    async fn watch_prefix(&self, prefix: &str) -> StateResult<WatchStream> {
        Ok(self.spawn_watch(KeyFilter::Prefix(prefix.to_string())))
    }

    async fn txn(&self, compare: Compare, then: Vec<TxnOp>) -> StateResult<bool> {
        Ok(self.commit(Some(&compare), &then)?.is_some())
    }
}

#[derive(Debug, Clone)]
enum KeyFilter {
    Exact(String),
    Prefix(String),
}

impl KeyFilter {
    fn matches(&self, key: &str) -> bool {
        match self {
            KeyFilter::Exact(k) => key == k,
            KeyFilter::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

/// Forward matching store events to one watcher until it goes away.
async fn forward_events(
    filter: KeyFilter,
    mut source: broadcast::Receiver<WatchEvent>,
    mut feed: WatchFeed,
) {
    loop {
        tokio::select! {
            received = source.recv() => match received {
                Ok(event) => {
                    if !filter.matches(&event.key) {
                        continue;
                    }
                    tokio::select! {
                        sent = feed.events.send(event) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = feed.shutdown.changed() => break,
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(?filter, skipped, "store watch lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = feed.shutdown.changed() => break,
        }
    }
    debug!(?filter, "store watch finished");
}
