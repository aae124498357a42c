//! redb table definitions for the embedded coordination store.

use redb::TableDefinition;

/// Every coordination key lives in one table; namespaces are key prefixes.
pub const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");
