//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Engine adapters for PostgreSQL, MySQL, SQL Server and SQLite
//! - The registry of configured databases
//! - Bounded connection pools with graceful shutdown
//! - Single-database query execution and multi-database fan-out
//! - Schema introspection
//! - Type mappings and parameter binding

pub mod adapters;
pub mod executor;
pub mod fanout;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod types;

pub use adapters::{DbPool, EngineConnection};
pub use executor::QueryExecutor;
pub use fanout::FanOutCoordinator;
pub use pool::{ManagedPool, PoolLease, PoolManager, PoolSnapshot};
pub use registry::{AdapterHandle, AdapterRegistry};
pub use schema::SchemaInspector;
