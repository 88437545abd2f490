//! Engine adapters.
//!
//! Each engine module knows how to open a driver pool, run a query and read
//! its catalog. [`DbPool`] and [`EngineConnection`] close over the four
//! engines so callers above this layer never match on driver types.

pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;

use crate::db::macros::{impl_conn_dispatch, impl_db_dispatch};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDescriptor, ColumnMetadata, DatabaseConfig, EngineKind, QueryRequest, QueryResult,
    TableDescriptor,
};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::Either;
use sqlx::pool::PoolConnection;
use sqlx::{MySql, MySqlPool, PgPool, Postgres, Sqlite};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Driver-level pool for one logical database.
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    SQLite(sqlite::SqliteHandle),
    SqlServer(sqlserver::SqlServerPool),
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbPool").field(&self.engine()).finish()
    }
}

impl DbPool {
    /// Open a driver pool for `config` and verify it with one round trip.
    ///
    /// Every failure is reported as a connection error carrying a suggestion.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!(
            database = %config.name,
            engine = %config.kind,
            target = %config.target_description(),
            "Opening connection pool"
        );

        let pool = match config.kind {
            EngineKind::Postgresql => DbPool::Postgres(postgres::connect(config).await?),
            EngineKind::Mysql => DbPool::MySql(mysql::connect(config).await?),
            EngineKind::Sqlite => DbPool::SQLite(sqlite::connect(config).await?),
            EngineKind::Sqlserver => DbPool::SqlServer(sqlserver::connect(config).await?),
        };

        match pool.server_version(&config.name).await {
            Ok(version) => debug!(database = %config.name, version = %version, "Server version"),
            Err(e) => warn!(database = %config.name, error = %e, "Failed to read server version"),
        }

        Ok(pool)
    }

    pub fn engine(&self) -> EngineKind {
        match self {
            DbPool::Postgres(_) => EngineKind::Postgresql,
            DbPool::MySql(_) => EngineKind::Mysql,
            DbPool::SQLite(_) => EngineKind::Sqlite,
            DbPool::SqlServer(_) => EngineKind::Sqlserver,
        }
    }

    /// Take one connection from the driver pool.
    pub async fn acquire(&self, database: &str) -> DbResult<EngineConnection> {
        let engine = self.engine();
        let conn = impl_db_dispatch!(self, {
            Postgres(p) => p
                .acquire()
                .await
                .map(EngineConnection::Postgres)
                .map_err(|e| acquire_error(database, engine, e)),
            MySql(p) => p
                .acquire()
                .await
                .map(EngineConnection::MySql)
                .map_err(|e| acquire_error(database, engine, e)),
            SQLite(p) => p
                .pool()
                .acquire()
                .await
                .map(EngineConnection::SQLite)
                .map_err(|e| acquire_error(database, engine, e)),
            SqlServer(p) => p.acquire(database).await.map(EngineConnection::SqlServer),
        })?;
        Ok(conn)
    }

    pub async fn server_version(&self, database: &str) -> DbResult<String> {
        impl_db_dispatch!(self, {
            Postgres(p) => postgres::server_version(p, database).await,
            MySql(p) => mysql::server_version(p, database).await,
            SQLite(p) => sqlite::server_version(p.pool(), database).await,
            SqlServer(p) => sqlserver::server_version(p, database).await,
        })
    }

    /// Close every connection held by the driver.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            Postgres(p) => p.close().await,
            MySql(p) => p.close().await,
            SQLite(p) => p.close().await,
            SqlServer(p) => p.close().await,
        })
    }
}

/// One connection checked out of a [`DbPool`].
///
/// Dropping it returns the connection to its driver pool unless
/// [`EngineConnection::discard`] was called first.
pub enum EngineConnection {
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
    SQLite(PoolConnection<Sqlite>),
    SqlServer(sqlserver::PooledClient),
}

impl EngineConnection {
    pub fn engine(&self) -> EngineKind {
        match self {
            EngineConnection::Postgres(_) => EngineKind::Postgresql,
            EngineConnection::MySql(_) => EngineKind::Mysql,
            EngineConnection::SQLite(_) => EngineKind::Sqlite,
            EngineConnection::SqlServer(_) => EngineKind::Sqlserver,
        }
    }

    /// Mark the connection so it is closed instead of reused.
    pub fn discard(&mut self) {
        impl_conn_dispatch!(self, {
            Postgres(c) => c.close_on_drop(),
            MySql(c) => c.close_on_drop(),
            SQLite(c) => c.close_on_drop(),
            SqlServer(c) => c.discard(),
        })
    }

    pub async fn execute(
        &mut self,
        database: &str,
        request: &QueryRequest,
    ) -> DbResult<QueryResult> {
        let started = Instant::now();
        let set = impl_conn_dispatch!(self, {
            Postgres(c) => postgres::execute(c, database, request).await,
            MySql(c) => mysql::execute(c, database, request).await,
            SQLite(c) => sqlite::execute(c, database, request).await,
            SqlServer(c) => sqlserver::execute(c, database, request).await,
        })?;
        let elapsed = started.elapsed().as_millis() as u64;
        Ok(set.into_result(elapsed))
    }

    pub async fn list_schemas(&mut self, database: &str) -> DbResult<Vec<String>> {
        impl_conn_dispatch!(self, {
            Postgres(c) => postgres::list_schemas(c, database).await,
            MySql(c) => mysql::list_schemas(c, database).await,
            SQLite(c) => sqlite::list_schemas(c, database).await,
            SqlServer(c) => sqlserver::list_schemas(c, database).await,
        })
    }

    /// `schema` is already resolved to the engine default when the caller
    /// named none. Only MySQL accepts `None`, meaning the current database.
    pub async fn list_tables(
        &mut self,
        database: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableDescriptor>> {
        impl_conn_dispatch!(self, {
            Postgres(c) => postgres::list_tables(c, database, schema.unwrap_or("public")).await,
            MySql(c) => mysql::list_tables(c, database, schema).await,
            SQLite(c) => sqlite::list_tables(c, database, schema.unwrap_or("main")).await,
            SqlServer(c) => sqlserver::list_tables(c, database, schema.unwrap_or("dbo")).await,
        })
    }

    /// Returns an empty list when the table does not exist.
    pub async fn describe_table(
        &mut self,
        database: &str,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        impl_conn_dispatch!(self, {
            Postgres(c) => {
                postgres::describe_table(c, database, table, schema.unwrap_or("public")).await
            },
            MySql(c) => mysql::describe_table(c, database, table, schema).await,
            SQLite(c) => sqlite::describe_table(c, database, table, schema.unwrap_or("main")).await,
            SqlServer(c) => {
                sqlserver::describe_table(c, database, table, schema.unwrap_or("dbo")).await
            },
        })
    }
}

// =============================================================================
// Result Collection
// =============================================================================

/// Rows gathered from one execution, before timing is attached.
#[derive(Debug, Default)]
pub(crate) struct RowSet {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub rows_affected: u64,
    pub truncated: bool,
}

impl RowSet {
    /// Start a new result set. Earlier sets are dropped; the last one wins.
    pub(crate) fn begin_result_set(&mut self, columns: Vec<ColumnMetadata>) {
        self.columns = columns;
        self.rows.clear();
        self.truncated = false;
    }

    /// Returns `false` once the limit is exceeded and reading should stop.
    pub(crate) fn push_row(
        &mut self,
        row: serde_json::Map<String, serde_json::Value>,
        limit: usize,
    ) -> bool {
        if self.rows.len() >= limit {
            self.truncated = true;
            return false;
        }
        self.rows.push(row);
        true
    }

    pub(crate) fn into_result(self, execution_time_ms: u64) -> QueryResult {
        if self.columns.is_empty() && self.rows.is_empty() {
            return QueryResult::affected(self.rows_affected, execution_time_ms);
        }
        QueryResult {
            columns: self.columns,
            rows: self.rows,
            rows_affected: None,
            truncated: self.truncated,
            execution_time_ms,
        }
    }
}

/// Drain a sqlx `fetch_many` stream into a [`RowSet`].
///
/// A row that follows a statement boundary starts a new result set.
pub(crate) async fn collect_sqlx<'e, R, Q>(
    mut stream: BoxStream<'e, Result<Either<Q, R>, sqlx::Error>>,
    database: &str,
    request: &QueryRequest,
    rows_affected: fn(&Q) -> u64,
) -> DbResult<RowSet>
where
    R: RowToJson,
{
    let limit = request.effective_limit() as usize;
    let mut set = RowSet::default();
    let mut at_boundary = true;

    while let Some(item) = stream
        .try_next()
        .await
        .map_err(|e| DbError::from_sqlx(database, e))?
    {
        match item {
            Either::Left(done) => {
                set.rows_affected += rows_affected(&done);
                at_boundary = true;
            }
            Either::Right(row) => {
                if at_boundary {
                    set.begin_result_set(row.column_metadata());
                    at_boundary = false;
                }
                if !set.push_row(row.to_json_map(request.decode_binary), limit) {
                    break;
                }
            }
        }
    }

    Ok(set)
}

// =============================================================================
// Connection Errors
// =============================================================================

/// Map a driver acquire failure. Failing to open a connection is always a
/// connection error, even when the server answered with an error packet.
pub(crate) fn acquire_error(database: &str, engine: EngineKind, err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::PoolClosed => DbError::cancelled(database, "connection pool is closed"),
        sqlx::Error::PoolTimedOut => DbError::connection(
            database,
            "Timed out opening a connection",
            connection_suggestion(engine, "timed out"),
        ),
        other => {
            let message = other.to_string();
            DbError::connection(
                database,
                format!("Failed to connect: {}", message),
                connection_suggestion(engine, &message),
            )
        }
    }
}

/// Generate a helpful suggestion based on the connection error.
pub(crate) fn connection_suggestion(engine: EngineKind, error: &str) -> String {
    let error = error.to_lowercase();

    if error.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accepting connections on the configured host and port",
            engine.display_name()
        );
    }
    if error.contains("timed out") || error.contains("timeout") {
        return "Check network reachability and firewall rules, or raise acquire_timeout_secs"
            .to_string();
    }
    if error.contains("authentication") || error.contains("password") || error.contains("login")
    {
        return "Verify the user and password for this database".to_string();
    }
    if error.contains("does not exist")
        || error.contains("unknown database")
        || error.contains("cannot open database")
    {
        return "Verify the database name exists on the server".to_string();
    }
    if error.contains("tls") || error.contains("ssl") || error.contains("certificate") {
        return "Check the encrypt and trust_server_certificate settings".to_string();
    }
    if error.contains("unable to open database file") {
        return "Check that the SQLite file path exists and its directory is writable".to_string();
    }

    match engine {
        EngineKind::Postgresql => "Check the PostgreSQL host, port, user and database".to_string(),
        EngineKind::Mysql => "Check the MySQL host, port, user and database".to_string(),
        EngineKind::Sqlserver => {
            "Check the SQL Server host, port, credentials and encryption settings".to_string()
        }
        EngineKind::Sqlite => "Check the SQLite file path and permissions".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::models::ConnectionParams;

    #[tokio::test]
    async fn test_sqlite_connection_describes_table() {
        let config = DatabaseConfig::new(
            "mem",
            EngineKind::Sqlite,
            ConnectionParams::sqlite(":memory:"),
            PoolOptions::default(),
        )
        .unwrap();
        let pool = DbPool::connect(&config).await.unwrap();
        let mut conn = pool.acquire("mem").await.unwrap();
        assert_eq!(conn.engine(), EngineKind::Sqlite);

        let create = QueryRequest::new("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)");
        conn.execute("mem", &create).await.unwrap();
        let columns = conn.describe_table("mem", "notes", None).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "body"]);
        assert!(columns[0].is_primary_key);

        assert!(conn.describe_table("mem", "absent", None).await.unwrap().is_empty());
        drop(conn);
        pool.close().await;
    }

    #[test]
    fn test_connection_suggestion_refused() {
        let s = connection_suggestion(EngineKind::Postgresql, "Connection refused (os error 111)");
        assert!(s.contains("PostgreSQL"));
        assert!(s.contains("running"));
    }

    #[test]
    fn test_connection_suggestion_auth() {
        let s = connection_suggestion(EngineKind::Mysql, "Access denied: password authentication");
        assert!(s.contains("password"));
    }

    #[test]
    fn test_connection_suggestion_fallback() {
        let s = connection_suggestion(EngineKind::Sqlite, "something odd");
        assert!(s.contains("SQLite"));
    }

    #[test]
    fn test_row_set_last_result_set_wins() {
        let mut set = RowSet::default();
        set.begin_result_set(vec![ColumnMetadata::new("a", "int")]);
        let mut row = serde_json::Map::new();
        row.insert("a".into(), serde_json::json!(1));
        assert!(set.push_row(row, 10));

        set.begin_result_set(vec![ColumnMetadata::new("b", "text")]);
        let mut row = serde_json::Map::new();
        row.insert("b".into(), serde_json::json!("x"));
        assert!(set.push_row(row, 10));

        let result = set.into_result(3);
        assert_eq!(result.column_names(), vec!["b".to_string()]);
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows_affected, None);
        assert_eq!(result.execution_time_ms, 3);
    }

    #[test]
    fn test_row_set_truncates_at_limit() {
        let mut set = RowSet::default();
        set.begin_result_set(vec![ColumnMetadata::new("n", "int")]);
        assert!(set.push_row(serde_json::Map::new(), 2));
        assert!(set.push_row(serde_json::Map::new(), 2));
        assert!(!set.push_row(serde_json::Map::new(), 2));

        let result = set.into_result(0);
        assert_eq!(result.row_count(), 2);
        assert!(result.truncated);
    }

    #[test]
    fn test_row_set_without_rows_reports_affected() {
        let set = RowSet {
            rows_affected: 4,
            ..Default::default()
        };
        let result = set.into_result(1);
        assert_eq!(result.rows_affected, Some(4));
        assert!(result.rows.is_empty());
        assert!(!result.truncated);
    }
}
