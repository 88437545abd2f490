//! Data models for the multi-database MCP server.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    ConnectionConfigError, ConnectionParams, DatabaseConfig, DatabaseStatus, DatabaseSummary,
    EngineKind, SQLITE_MEMORY,
};
pub use query::{
    ColumnMetadata, DEFAULT_ROW_LIMIT, DatabaseOutcome, MAX_QUERY_TIMEOUT_SECS, MAX_ROW_LIMIT,
    QueryErrorReport, QueryParam, QueryRequest, QueryResult,
};
pub use schema::{ColumnDescriptor, TableDescriptor, TableKind};
