//! MySQL and MariaDB adapter.
//!
//! Catalog strings are read through `CONVERT(... USING utf8mb4)` because some
//! server versions report information_schema columns as VARBINARY.

use super::{RowSet, acquire_error, collect_sqlx};
use crate::db::params::bind_mysql_param;
use crate::db::types::normalize_type_name;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDescriptor, DatabaseConfig, EngineKind, QueryRequest, TableDescriptor, TableKind,
};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlQueryResult, MySqlRow, MySqlSslMode};
use sqlx::pool::PoolConnection;
use sqlx::{Executor, MySql, MySqlPool, Row};
use tracing::debug;

mod queries {
    pub const CURRENT_DATABASE: &str = "SELECT CONVERT(DATABASE() USING utf8mb4) AS name";

    pub const LIST_TABLES: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME,
            CONVERT(TABLE_SCHEMA USING utf8mb4) AS TABLE_SCHEMA,
            CONVERT(TABLE_TYPE USING utf8mb4) AS TABLE_TYPE
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY TABLE_NAME
    "#;

    pub const DESCRIBE_TABLE: &str = r#"
        SELECT
            CONVERT(c.COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(c.COLUMN_TYPE USING utf8mb4) AS COLUMN_TYPE,
            CONVERT(c.IS_NULLABLE USING utf8mb4) AS IS_NULLABLE,
            CONVERT(c.COLUMN_DEFAULT USING utf8mb4) AS COLUMN_DEFAULT,
            CAST(c.ORDINAL_POSITION AS SIGNED) AS ORDINAL_POSITION,
            CAST(c.CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS MAX_LENGTH,
            CONVERT(c.COLUMN_KEY USING utf8mb4) AS COLUMN_KEY,
            CAST(EXISTS (
                SELECT 1
                FROM information_schema.KEY_COLUMN_USAGE k
                WHERE k.TABLE_SCHEMA = c.TABLE_SCHEMA
                  AND k.TABLE_NAME = c.TABLE_NAME
                  AND k.COLUMN_NAME = c.COLUMN_NAME
                  AND k.REFERENCED_TABLE_NAME IS NOT NULL
            ) AS SIGNED) AS IS_FOREIGN_KEY
        FROM information_schema.COLUMNS c
        WHERE c.TABLE_NAME = ? AND c.TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY c.ORDINAL_POSITION
    "#;
}

pub(super) async fn connect(config: &DatabaseConfig) -> DbResult<MySqlPool> {
    let params = &config.params;
    let pool_opts = &config.pool;

    let mut options = MySqlConnectOptions::new()
        .host(params.host_or_default())
        .port(params.port.unwrap_or(3306))
        .database(&params.database)
        .charset("utf8mb4");
    if let Some(user) = &params.user {
        options = options.username(user);
    }
    if let Some(password) = &params.password {
        options = options.password(password);
    }
    options = options.ssl_mode(match (params.encrypt, params.trust_server_certificate) {
        (false, _) => MySqlSslMode::Preferred,
        (true, true) => MySqlSslMode::Required,
        (true, false) => MySqlSslMode::VerifyIdentity,
    });

    MySqlPoolOptions::new()
        .min_connections(pool_opts.min_connections_or_default(false))
        .max_connections(pool_opts.max_connections_or_default(false))
        .acquire_timeout(pool_opts.acquire_timeout())
        .idle_timeout(Some(pool_opts.idle_timeout()))
        .max_lifetime(Some(pool_opts.max_lifetime()))
        .test_before_acquire(pool_opts.test_before_acquire_or_default())
        .connect_with(options)
        .await
        .map_err(|e| acquire_error(&config.name, EngineKind::Mysql, e))
}

pub(super) async fn server_version(pool: &MySqlPool, database: &str) -> DbResult<String> {
    let row = sqlx::query("SELECT version()")
        .fetch_one(pool)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;
    Ok(get_string_by_index(&row, 0).unwrap_or_default())
}

pub(super) async fn execute(
    conn: &mut PoolConnection<MySql>,
    database: &str,
    request: &QueryRequest,
) -> DbResult<RowSet> {
    let stream = if request.params.is_empty() {
        (&mut **conn).fetch_many(request.sql.as_str())
    } else {
        let mut query = sqlx::query(&request.sql);
        for param in &request.params {
            query = bind_mysql_param(query, param);
        }
        (&mut **conn).fetch_many(query)
    };

    collect_sqlx(stream, database, request, MySqlQueryResult::rows_affected).await
}

/// MySQL has no schema level below the database; this reports the current
/// database only.
pub(super) async fn list_schemas(
    conn: &mut PoolConnection<MySql>,
    database: &str,
) -> DbResult<Vec<String>> {
    let row = sqlx::query(queries::CURRENT_DATABASE)
        .fetch_one(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;

    Ok(get_optional_string(&row, "name").into_iter().collect())
}

pub(super) async fn list_tables(
    conn: &mut PoolConnection<MySql>,
    database: &str,
    schema: Option<&str>,
) -> DbResult<Vec<TableDescriptor>> {
    let rows = sqlx::query(queries::LIST_TABLES)
        .bind(schema)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;

    let tables = rows
        .iter()
        .map(|row| {
            let kind = TableKind::parse(&get_string(row, "TABLE_TYPE"));
            TableDescriptor::new(get_string(row, "TABLE_NAME"), kind)
                .with_schema(get_string(row, "TABLE_SCHEMA"))
        })
        .collect::<Vec<_>>();

    debug!(database, count = tables.len(), "Listed MySQL tables");
    Ok(tables)
}

pub(super) async fn describe_table(
    conn: &mut PoolConnection<MySql>,
    database: &str,
    table: &str,
    schema: Option<&str>,
) -> DbResult<Vec<ColumnDescriptor>> {
    let rows = sqlx::query(queries::DESCRIBE_TABLE)
        .bind(table)
        .bind(schema)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;

    let columns = rows
        .iter()
        .map(|row| {
            let column_type = get_string(row, "COLUMN_TYPE");
            let column_key = get_string(row, "COLUMN_KEY");
            let ordinal = row.try_get::<i64, _>("ORDINAL_POSITION").unwrap_or(0);
            let foreign = row.try_get::<i64, _>("IS_FOREIGN_KEY").unwrap_or(0) != 0;

            ColumnDescriptor::new(
                get_string(row, "COLUMN_NAME"),
                column_type.clone(),
                get_string(row, "IS_NULLABLE").eq_ignore_ascii_case("YES"),
                ordinal.max(0) as u32,
            )
            .with_normalized_type(normalize_type_name(EngineKind::Mysql, &column_type))
            .with_default(get_optional_string(row, "COLUMN_DEFAULT"))
            .with_max_length(row.try_get::<Option<i64>, _>("MAX_LENGTH").ok().flatten())
            .with_primary_key(column_key == "PRI")
            .with_key(column_key == "UNI" || foreign)
        })
        .collect::<Vec<_>>();

    debug!(database, table, count = columns.len(), "Described MySQL table");
    Ok(columns)
}

/// Safely get a string from a MySQL row, handling VARBINARY.
fn get_string(row: &MySqlRow, column: &str) -> String {
    row.try_get::<String, _>(column)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .unwrap_or_default()
}

fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

fn get_string_by_index(row: &MySqlRow, index: usize) -> Option<String> {
    row.try_get::<String, _>(index).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(index)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}
