//! MCP tool implementations.
//!
//! This module contains all database tool handlers:
//! - `list_databases`: Configured databases and their status
//! - `list_schemas`: Schemas in one database
//! - `list_tables`: Tables and views in a schema
//! - `describe_table`: Column details for one table
//! - `query_database`: Run SQL on one database
//! - `query_multiple_databases`: Run SQL on several databases at once

pub mod format;
pub mod query;
pub mod schema;

pub use format::OutputFormat;
pub use query::{MultiQueryInput, MultiQueryOutput, QueryInput, QueryOutput, QueryToolHandler};
pub use schema::{
    DescribeTableInput, DescribeTableOutput, ListDatabasesOutput, ListSchemasInput,
    ListSchemasOutput, ListTablesInput, ListTablesOutput, SchemaToolHandler,
};
