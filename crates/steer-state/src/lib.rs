//! steer-state — the coordination store.
//!
//! Defines the `CoordinationStore` contract the failover coordinator and
//! the registry build on: linearizable put/get/delete, key and prefix
//! watches, and compare-and-swap transactions. `KvStore` implements it
//! on an embedded [redb](https://docs.rs/redb) database.
//!
//! # Architecture
//!
//! ```text
//! KvStore
//!   ├── redb Database (single "kv" table, &str → &[u8])
//!   ├── commit lock (serializes commit + event publication)
//!   └── broadcast event buffer
//!       └── one forwarding task per WatchStream (key or prefix filter)
//! ```
//!
//! Events are published in commit order. Each watch forwards matching
//! events into a single-slot channel, so a slow consumer holds back its
//! own watch until the shared event buffer overflows.

pub mod coordination;
pub mod error;
pub mod store;
pub mod tables;

pub use coordination::{
    Compare, CoordinationStore, EventKind, TxnOp, WatchEvent, WatchFeed, WatchStream,
    watch_channel,
};
pub use error::{StateError, StateResult};
pub use store::KvStore;
