//! SQLite adapter.
//!
//! An in-memory database lives only as long as one of its connections, so
//! [`SqliteHandle`] keeps an extra connection open outside the pool. Pooled
//! connections can then be discarded or idle out without losing data.

use super::{RowSet, acquire_error, collect_sqlx};
use crate::db::params::bind_sqlite_param;
use crate::db::types::normalize_type_name;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDescriptor, DatabaseConfig, EngineKind, QueryRequest, TableDescriptor, TableKind,
};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteQueryResult,
};
use sqlx::{ConnectOptions, Connection, Executor, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

mod queries {
    pub const LIST_SCHEMAS: &str = "SELECT name FROM pragma_database_list ORDER BY seq";

    pub const TABLE_INFO: &str = r#"
        SELECT cid, name, type, "notnull", dflt_value, pk
        FROM pragma_table_info(?1, ?2)
        ORDER BY cid
    "#;

    pub const UNIQUE_COLUMNS: &str = r#"
        SELECT ii.name AS name
        FROM pragma_index_list(?1, ?2) AS il, pragma_index_info(il.name, ?2) AS ii
        WHERE il."unique" = 1
    "#;

    pub const FOREIGN_KEY_COLUMNS: &str = r#"
        SELECT "from" AS name FROM pragma_foreign_key_list(?1, ?2)
    "#;

    /// `{schema}` is substituted with a quoted identifier.
    pub const LIST_TABLES: &str = r#"
        SELECT name, type
        FROM {schema}.sqlite_master
        WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
        ORDER BY name
    "#;
}

/// SQLite pool plus the connection that keeps an in-memory database alive.
pub struct SqliteHandle {
    pool: SqlitePool,
    anchor: Mutex<Option<SqliteConnection>>,
}

impl SqliteHandle {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        if let Some(conn) = self.anchor.lock().await.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Failed to close SQLite anchor connection");
            }
        }
    }
}

pub(super) async fn connect(config: &DatabaseConfig) -> DbResult<SqliteHandle> {
    let params = &config.params;
    let pool_opts = &config.pool;
    let connect_err = |e: sqlx::Error| acquire_error(&config.name, EngineKind::Sqlite, e);

    let options = if params.is_sqlite_memory() {
        // Each `sqlite::memory:` options value names its own shared-cache
        // database; clones share it.
        SqliteConnectOptions::from_str("sqlite::memory:").map_err(connect_err)?
    } else {
        SqliteConnectOptions::new()
            .filename(&params.database)
            .create_if_missing(true)
    };
    let options = options.busy_timeout(Duration::from_secs(5));

    let anchor = if params.is_sqlite_memory() {
        Some(options.connect().await.map_err(connect_err)?)
    } else {
        None
    };

    let pool = SqlitePoolOptions::new()
        .min_connections(pool_opts.min_connections_or_default(true))
        .max_connections(pool_opts.max_connections_or_default(true))
        .acquire_timeout(pool_opts.acquire_timeout())
        .idle_timeout(Some(pool_opts.idle_timeout()))
        .max_lifetime(Some(pool_opts.max_lifetime()))
        .test_before_acquire(pool_opts.test_before_acquire_or_default())
        .connect_with(options)
        .await
        .map_err(connect_err)?;

    Ok(SqliteHandle {
        pool,
        anchor: Mutex::new(anchor),
    })
}

pub(super) async fn server_version(pool: &SqlitePool, database: &str) -> DbResult<String> {
    sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
        .fetch_one(pool)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))
}

pub(super) async fn execute(
    conn: &mut PoolConnection<Sqlite>,
    database: &str,
    request: &QueryRequest,
) -> DbResult<RowSet> {
    let stream = if request.params.is_empty() {
        (&mut **conn).fetch_many(request.sql.as_str())
    } else {
        let mut query = sqlx::query(&request.sql);
        for param in &request.params {
            query = bind_sqlite_param(query, param);
        }
        (&mut **conn).fetch_many(query)
    };

    collect_sqlx(stream, database, request, SqliteQueryResult::rows_affected).await
}

pub(super) async fn list_schemas(
    conn: &mut PoolConnection<Sqlite>,
    database: &str,
) -> DbResult<Vec<String>> {
    let rows = sqlx::query(queries::LIST_SCHEMAS)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;

    Ok(rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("name").ok())
        .collect())
}

pub(super) async fn list_tables(
    conn: &mut PoolConnection<Sqlite>,
    database: &str,
    schema: &str,
) -> DbResult<Vec<TableDescriptor>> {
    let sql = queries::LIST_TABLES.replace("{schema}", &quote_identifier(schema));
    let rows = sqlx::query(&sql)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;

    let tables = rows
        .iter()
        .map(|row| {
            let name: String = row.get("name");
            let kind: String = row.get("type");
            TableDescriptor::new(name, TableKind::parse(&kind)).with_schema(schema)
        })
        .collect::<Vec<_>>();

    debug!(database, schema, count = tables.len(), "Listed SQLite tables");
    Ok(tables)
}

pub(super) async fn describe_table(
    conn: &mut PoolConnection<Sqlite>,
    database: &str,
    table: &str,
    schema: &str,
) -> DbResult<Vec<ColumnDescriptor>> {
    let info = sqlx::query(queries::TABLE_INFO)
        .bind(table)
        .bind(schema)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;
    if info.is_empty() {
        return Ok(Vec::new());
    }

    let mut keyed = HashSet::new();
    for sql in [queries::UNIQUE_COLUMNS, queries::FOREIGN_KEY_COLUMNS] {
        let rows = sqlx::query(sql)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| DbError::from_sqlx(database, e))?;
        keyed.extend(
            rows.iter()
                .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten()),
        );
    }

    let columns = info
        .iter()
        .map(|row| {
            let name: String = row.get("name");
            let data_type: String = row.try_get("type").unwrap_or_default();
            let cid: i64 = row.get("cid");
            let not_null: i64 = row.get("notnull");
            let pk: i64 = row.get("pk");
            let is_key = keyed.contains(&name);

            ColumnDescriptor::new(name, data_type.clone(), not_null == 0, (cid + 1).max(1) as u32)
                .with_normalized_type(normalize_type_name(EngineKind::Sqlite, &data_type))
                .with_default(row.try_get::<Option<String>, _>("dflt_value").ok().flatten())
                .with_max_length(declared_length(&data_type))
                .with_primary_key(pk > 0)
                .with_key(is_key)
        })
        .collect::<Vec<_>>();

    debug!(database, schema, table, count = columns.len(), "Described SQLite table");
    Ok(columns)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Length from a declared character type such as `VARCHAR(40)`.
fn declared_length(data_type: &str) -> Option<i64> {
    let upper = data_type.to_uppercase();
    if !(upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT")) {
        return None;
    }
    let open = upper.find('(')?;
    let close = upper[open..].find(')')? + open;
    upper[open + 1..close].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("main"), "\"main\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_declared_length() {
        assert_eq!(declared_length("VARCHAR(40)"), Some(40));
        assert_eq!(declared_length("nchar( 8 )"), Some(8));
        assert_eq!(declared_length("TEXT"), None);
        assert_eq!(declared_length("DECIMAL(10,2)"), None);
        assert_eq!(declared_length(""), None);
    }
}
