//! redb table definitions for the scalerd state store.

use redb::TableDefinition;

/// Coordination leases keyed by scaler id.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");
