//! PostgreSQL adapter.

use super::{RowSet, acquire_error, collect_sqlx};
use crate::db::params::bind_postgres_param;
use crate::db::types::normalize_type_name;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDescriptor, DatabaseConfig, EngineKind, QueryRequest, TableDescriptor, TableKind,
};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgQueryResult, PgSslMode};
use sqlx::{Executor, PgPool, Postgres, Row};
use tracing::debug;

mod queries {
    pub const LIST_SCHEMAS: &str = r#"
        SELECT schema_name::text AS schema_name
        FROM information_schema.schemata
        WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
          AND schema_name NOT LIKE 'pg_temp_%'
          AND schema_name NOT LIKE 'pg_toast_temp_%'
        ORDER BY schema_name
    "#;

    pub const LIST_TABLES: &str = r#"
        SELECT
            table_name::text AS table_name,
            table_schema::text AS table_schema,
            table_type::text AS table_type
        FROM information_schema.tables
        WHERE table_schema = $1
        ORDER BY table_name
    "#;

    pub const DESCRIBE_TABLE: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS data_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            c.ordinal_position::int4 AS ordinal_position,
            c.character_maximum_length::int8 AS max_length,
            EXISTS (
                SELECT 1
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON kcu.constraint_schema = tc.constraint_schema
                 AND kcu.constraint_name = tc.constraint_name
                WHERE tc.constraint_type = 'PRIMARY KEY'
                  AND kcu.table_schema = c.table_schema
                  AND kcu.table_name = c.table_name
                  AND kcu.column_name = c.column_name
            ) AS is_primary_key,
            EXISTS (
                SELECT 1
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON kcu.constraint_schema = tc.constraint_schema
                 AND kcu.constraint_name = tc.constraint_name
                WHERE tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY')
                  AND kcu.table_schema = c.table_schema
                  AND kcu.table_name = c.table_name
                  AND kcu.column_name = c.column_name
            ) AS is_key
        FROM information_schema.columns c
        JOIN pg_catalog.pg_namespace n ON n.nspname = c.table_schema
        JOIN pg_catalog.pg_class t ON t.relname = c.table_name AND t.relnamespace = n.oid
        JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        WHERE c.table_schema = $1 AND c.table_name = $2
        ORDER BY c.ordinal_position
    "#;
}

pub(super) async fn connect(config: &DatabaseConfig) -> DbResult<PgPool> {
    let params = &config.params;
    let pool_opts = &config.pool;

    let mut options = PgConnectOptions::new()
        .host(params.host_or_default())
        .port(params.port.unwrap_or(5432))
        .database(&params.database);
    if let Some(user) = &params.user {
        options = options.username(user);
    }
    if let Some(password) = &params.password {
        options = options.password(password);
    }
    options = options.ssl_mode(match (params.encrypt, params.trust_server_certificate) {
        (false, _) => PgSslMode::Prefer,
        (true, true) => PgSslMode::Require,
        (true, false) => PgSslMode::VerifyFull,
    });

    PgPoolOptions::new()
        .min_connections(pool_opts.min_connections_or_default(false))
        .max_connections(pool_opts.max_connections_or_default(false))
        .acquire_timeout(pool_opts.acquire_timeout())
        .idle_timeout(Some(pool_opts.idle_timeout()))
        .max_lifetime(Some(pool_opts.max_lifetime()))
        .test_before_acquire(pool_opts.test_before_acquire_or_default())
        .connect_with(options)
        .await
        .map_err(|e| acquire_error(&config.name, EngineKind::Postgresql, e))
}

pub(super) async fn server_version(pool: &PgPool, database: &str) -> DbResult<String> {
    sqlx::query_scalar::<_, String>("SELECT version()")
        .fetch_one(pool)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))
}

/// Statements without parameters go over the simple query protocol, so a
/// script of several statements runs in one call.
pub(super) async fn execute(
    conn: &mut PoolConnection<Postgres>,
    database: &str,
    request: &QueryRequest,
) -> DbResult<RowSet> {
    let stream = if request.params.is_empty() {
        (&mut **conn).fetch_many(request.sql.as_str())
    } else {
        let mut query = sqlx::query(&request.sql);
        for param in &request.params {
            query = bind_postgres_param(query, param);
        }
        (&mut **conn).fetch_many(query)
    };

    collect_sqlx(stream, database, request, PgQueryResult::rows_affected).await
}

pub(super) async fn list_schemas(
    conn: &mut PoolConnection<Postgres>,
    database: &str,
) -> DbResult<Vec<String>> {
    let rows = sqlx::query(queries::LIST_SCHEMAS)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;

    let schemas = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("schema_name").ok())
        .collect::<Vec<_>>();

    debug!(database, count = schemas.len(), "Listed PostgreSQL schemas");
    Ok(schemas)
}

pub(super) async fn list_tables(
    conn: &mut PoolConnection<Postgres>,
    database: &str,
    schema: &str,
) -> DbResult<Vec<TableDescriptor>> {
    let rows = sqlx::query(queries::LIST_TABLES)
        .bind(schema)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;

    let tables = rows
        .iter()
        .map(|row| {
            let name: String = row.get("table_name");
            let table_schema: String = row.get("table_schema");
            let table_type: String = row.get("table_type");
            TableDescriptor::new(name, TableKind::parse(&table_type)).with_schema(table_schema)
        })
        .collect::<Vec<_>>();

    debug!(database, schema, count = tables.len(), "Listed PostgreSQL tables");
    Ok(tables)
}

pub(super) async fn describe_table(
    conn: &mut PoolConnection<Postgres>,
    database: &str,
    table: &str,
    schema: &str,
) -> DbResult<Vec<ColumnDescriptor>> {
    let rows = sqlx::query(queries::DESCRIBE_TABLE)
        .bind(schema)
        .bind(table)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?;

    let columns = rows
        .iter()
        .map(|row| {
            let data_type: String = row.get("data_type");
            let nullable: String = row.get("is_nullable");
            let ordinal: i32 = row.get("ordinal_position");
            ColumnDescriptor::new(
                row.get::<String, _>("column_name"),
                data_type.clone(),
                nullable.eq_ignore_ascii_case("YES"),
                ordinal.max(0) as u32,
            )
            .with_normalized_type(normalize_type_name(EngineKind::Postgresql, &data_type))
            .with_default(row.get::<Option<String>, _>("column_default"))
            .with_max_length(row.get::<Option<i64>, _>("max_length"))
            .with_primary_key(row.get::<bool, _>("is_primary_key"))
            .with_key(row.get::<bool, _>("is_key"))
        })
        .collect::<Vec<_>>();

    debug!(database, schema, table, count = columns.len(), "Described PostgreSQL table");
    Ok(columns)
}
