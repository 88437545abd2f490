//! Shared helpers for integration tests.

#![allow(dead_code)]

use multidb_mcp_server::config::parse_database_configs;
use multidb_mcp_server::db::{AdapterRegistry, PoolManager};
use multidb_mcp_server::mcp::ServiceContext;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const FANOUT_TIMEOUT: Duration = Duration::from_secs(20);

/// Build a service context from a database config JSON document.
pub fn context_from_json(json: &str) -> ServiceContext {
    context_with_fanout_timeout(json, FANOUT_TIMEOUT)
}

/// Like [`context_from_json`] with a custom overall bound for multi-database queries.
pub fn context_with_fanout_timeout(json: &str, fanout_timeout: Duration) -> ServiceContext {
    let configs = parse_database_configs(json).unwrap();
    let registry = Arc::new(AdapterRegistry::new(configs).unwrap());
    let pools = Arc::new(PoolManager::new(registry));
    ServiceContext::new(pools, QUERY_TIMEOUT, fanout_timeout)
}

/// Path to a fresh SQLite file that outlives the handle.
pub fn temp_sqlite_path() -> String {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the file alive after the handle drops
    temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// JSON string literal for a filesystem path.
pub fn json_path(path: &str) -> String {
    serde_json::to_string(path).unwrap()
}
