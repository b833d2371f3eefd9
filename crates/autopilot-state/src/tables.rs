//! redb table definitions for the autopilot state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Deployment records keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Last successful scaling step keyed by service.
pub const SCALING_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling_state");

/// Acted-on scaling decisions keyed by `{service}:{timestamp_ms:020}`.
pub const SCALING_HISTORY: TableDefinition<&str, &[u8]> =
    TableDefinition::new("scaling_history");

/// Chaos experiment results keyed by run id.
pub const CHAOS_RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("chaos_results");
