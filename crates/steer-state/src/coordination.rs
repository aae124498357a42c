//! The coordination store contract.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::StateResult;

/// Kind of change a watch observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single change delivered to a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    /// New value for puts, empty for deletes.
    pub value: Vec<u8>,
}

impl WatchEvent {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: EventKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }
}

/// Guard of a conditional transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// Holds when `key` exists and its value equals `value`.
    ValueEquals { key: String, value: Vec<u8> },
}

impl Compare {
    pub fn value_equals(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Compare::ValueEquals {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Operation applied when a transaction's guard holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }
}

/// A transactional, watchable key-value store.
///
/// Implementations must make `txn` atomic with respect to every other
/// write: of any number of concurrent transactions guarded on the same
/// key, at most one may observe the guard holding.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn put(&self, key: &str, value: &[u8]) -> StateResult<()>;

    /// `None` when the key is absent. An empty value is a present key.
    async fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>>;

    /// Every key/value pair whose key starts with `prefix`.
    async fn get_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> StateResult<bool>;

    /// Watch changes to exactly `key`.
    async fn watch(&self, key: &str) -> StateResult<WatchStream>;

    /// Watch changes to every key under `prefix`.
    async fn watch_prefix(&self, prefix: &str) -> StateResult<WatchStream>;

    /// Apply `then` atomically if `compare` holds. Returns whether it committed.
    async fn txn(&self, compare: Compare, then: Vec<TxnOp>) -> StateResult<bool>;
}

/// Producer half of a watch, held by the task that forwards events.
pub struct WatchFeed {
    pub events: mpsc::Sender<WatchEvent>,
    /// Changes (or errors) once the consumer cancels or drops its stream.
    pub shutdown: watch::Receiver<bool>,
}

/// Consumer half of a watch.
///
/// `recv` returns `None` once the producer is gone. Dropping the stream
/// or calling `cancel` stops the producer on its next wait point.
pub struct WatchStream {
    events: mpsc::Receiver<WatchEvent>,
    shutdown: watch::Sender<bool>,
}

impl WatchStream {
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Create a single-slot watch channel.
pub fn watch_channel() -> (WatchFeed, WatchStream) {
    let (events_tx, events_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    (
        WatchFeed {
            events: events_tx,
            shutdown: shutdown_rx,
        },
        WatchStream {
            events: events_rx,
            shutdown: shutdown_tx,
        },
    )
}
