//! Discovery and schema introspection tools.
//!
//! This module implements the `list_databases`, `list_schemas`,
//! `list_tables` and `describe_table` MCP tools.

use crate::db::{PoolManager, SchemaInspector};
use crate::error::DbResult;
use crate::models::{ColumnDescriptor, DatabaseStatus, DatabaseSummary, TableDescriptor};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Output for the list_databases tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListDatabasesOutput {
    pub databases: Vec<DatabaseSummary>,
    pub count: usize,
    /// Databases with an open connection pool
    pub connected: usize,
}

/// Input for the list_schemas tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListSchemasInput {
    /// Logical database name from list_databases
    pub database_name: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListSchemasOutput {
    pub database_name: String,
    pub schemas: Vec<String>,
    pub count: usize,
}

/// Input for the list_tables tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Logical database name from list_databases
    pub database_name: String,
    /// Schema to list. Default: public (PostgreSQL), dbo (SQL Server), main (SQLite), current database (MySQL)
    #[serde(default)]
    pub schema: Option<String>,
}

/// Output from the list_tables tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListTablesOutput {
    pub database_name: String,
    /// Tables and views, sorted by name
    pub tables: Vec<TableDescriptor>,
    pub count: usize,
}

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    /// Logical database name from list_databases
    pub database_name: String,
    pub table_name: String,
    /// Schema containing the table. Default: the engine's default schema
    #[serde(default)]
    pub schema: Option<String>,
}

/// Output from the describe_table tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DescribeTableOutput {
    pub database_name: String,
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,
    /// Names of the primary key columns, in ordinal order
    pub primary_key: Vec<String>,
}

/// Handler for discovery and schema tools.
pub struct SchemaToolHandler {
    pools: Arc<PoolManager>,
    inspector: Arc<SchemaInspector>,
}

impl SchemaToolHandler {
    pub fn new(pools: Arc<PoolManager>, inspector: Arc<SchemaInspector>) -> Self {
        Self { pools, inspector }
    }

    pub fn list_databases(&self) -> ListDatabasesOutput {
        let databases = self.pools.summaries();
        let connected = databases
            .iter()
            .filter(|d| d.status == DatabaseStatus::Connected)
            .count();
        ListDatabasesOutput {
            count: databases.len(),
            connected,
            databases,
        }
    }

    pub async fn list_schemas(&self, input: ListSchemasInput) -> DbResult<ListSchemasOutput> {
        let database = input.database_name.trim();
        let schemas = self.inspector.list_schemas(database).await?;
        Ok(ListSchemasOutput {
            database_name: database.to_string(),
            count: schemas.len(),
            schemas,
        })
    }

    pub async fn list_tables(&self, input: ListTablesInput) -> DbResult<ListTablesOutput> {
        let database = input.database_name.trim();
        let tables = self
            .inspector
            .list_tables(database, input.schema.as_deref())
            .await?;

        info!(database = %database, count = tables.len(), "Listed tables");

        Ok(ListTablesOutput {
            database_name: database.to_string(),
            count: tables.len(),
            tables,
        })
    }

    pub async fn describe_table(&self, input: DescribeTableInput) -> DbResult<DescribeTableOutput> {
        let database = input.database_name.trim();
        let columns = self
            .inspector
            .describe_table(database, &input.table_name, input.schema.as_deref())
            .await?;

        let primary_key = columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect();

        info!(
            database = %database,
            table = %input.table_name,
            columns = columns.len(),
            "Described table"
        );

        Ok(DescribeTableOutput {
            database_name: database.to_string(),
            table_name: input.table_name.trim().to_string(),
            schema: input.schema.filter(|s| !s.trim().is_empty()),
            columns,
            primary_key,
        })
    }
}
