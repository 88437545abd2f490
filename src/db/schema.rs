//! Schema introspection.
//!
//! Thin layer over the adapters' catalog queries. It picks the engine's
//! default schema when the caller names none and turns an empty column list
//! into [`DbError::TableNotFound`], so every engine reports a missing table
//! the same way. Results are never cached.

use crate::db::pool::PoolManager;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, TableDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Schema inspector for database introspection.
#[derive(Debug, Clone)]
pub struct SchemaInspector {
    pools: Arc<PoolManager>,
    timeout: Duration,
}

impl SchemaInspector {
    pub fn new(pools: Arc<PoolManager>, timeout: Duration) -> Self {
        Self { pools, timeout }
    }

    /// List schemas (MySQL: the current database).
    pub async fn list_schemas(&self, database: &str) -> DbResult<Vec<String>> {
        let mut lease = self.pools.borrow(database).await?;
        let outcome = self
            .pools
            .supervise(
                database,
                "list_schemas",
                self.timeout,
                lease.connection().list_schemas(database),
            )
            .await;
        lease.settle(outcome)
    }

    /// List tables and views in `schema`, or the engine's default schema.
    pub async fn list_tables(
        &self,
        database: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableDescriptor>> {
        let schema = self.resolve_schema(database, schema)?;

        let mut lease = self.pools.borrow(database).await?;
        let outcome = self
            .pools
            .supervise(
                database,
                "list_tables",
                self.timeout,
                lease.connection().list_tables(database, schema.as_deref()),
            )
            .await;
        let tables = lease.settle(outcome)?;

        debug!(database, schema = ?schema, count = tables.len(), "Listed tables");
        Ok(tables)
    }

    /// Describe the columns of `table`, in ordinal order.
    pub async fn describe_table(
        &self,
        database: &str,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        let table = table.trim();
        if table.is_empty() {
            return Err(DbError::invalid_input("Table name cannot be empty"));
        }
        let schema = self.resolve_schema(database, schema)?;

        let mut lease = self.pools.borrow(database).await?;
        let outcome = self
            .pools
            .supervise(
                database,
                "describe_table",
                self.timeout,
                lease
                    .connection()
                    .describe_table(database, table, schema.as_deref()),
            )
            .await;
        let columns = lease.settle(outcome)?;

        if columns.is_empty() {
            return Err(DbError::table_not_found(database, table, schema));
        }
        Ok(columns)
    }

    /// Caller's schema, else the engine default. `None` only for MySQL.
    fn resolve_schema(&self, database: &str, schema: Option<&str>) -> DbResult<Option<String>> {
        let handle = self.pools.registry().resolve(database)?;
        Ok(schema
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(handle.engine().default_schema())
            .map(str::to_string))
    }
}
