//! SQL Server adapter on tiberius.
//!
//! tiberius ships no pool, so clients are pooled with deadpool through
//! [`TdsManager`], which applies the same idle-timeout, max-lifetime and
//! test-before-acquire rules the sqlx pools do.

use super::{RowSet, connection_suggestion};
use crate::db::params::bind_sqlserver_param;
use crate::db::types::{RowToJson, normalize_type_name, sqlserver_type_name};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDescriptor, ColumnMetadata, DatabaseConfig, EngineKind, QueryRequest, TableDescriptor,
    TableKind,
};
use deadpool::Runtime;
use deadpool::managed::{self, Metrics, Object, PoolError, RecycleError, RecycleResult};
use futures_util::TryStreamExt;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, QueryItem, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

type TdsClient = Client<Compat<TcpStream>>;

mod queries {
    pub const LIST_SCHEMAS: &str = r#"
        SELECT SCHEMA_NAME
        FROM INFORMATION_SCHEMA.SCHEMATA
        WHERE SCHEMA_NAME NOT IN ('sys', 'INFORMATION_SCHEMA', 'guest')
          AND SCHEMA_NAME NOT LIKE 'db[_]%'
        ORDER BY SCHEMA_NAME
    "#;

    pub const LIST_TABLES: &str = r#"
        SELECT TABLE_NAME, TABLE_SCHEMA, TABLE_TYPE
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = @P1
        ORDER BY TABLE_NAME
    "#;

    pub const DESCRIBE_TABLE: &str = r#"
        SELECT
            c.COLUMN_NAME,
            c.DATA_TYPE,
            c.IS_NULLABLE,
            c.COLUMN_DEFAULT,
            CAST(c.ORDINAL_POSITION AS INT) AS ORDINAL_POSITION,
            CAST(c.CHARACTER_MAXIMUM_LENGTH AS BIGINT) AS MAX_LENGTH,
            CAST(CASE WHEN EXISTS (
                SELECT 1
                FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
                  ON k.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
                 AND k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                  AND k.TABLE_SCHEMA = c.TABLE_SCHEMA
                  AND k.TABLE_NAME = c.TABLE_NAME
                  AND k.COLUMN_NAME = c.COLUMN_NAME
            ) THEN 1 ELSE 0 END AS BIT) AS IS_PRIMARY_KEY,
            CAST(CASE WHEN EXISTS (
                SELECT 1
                FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
                  ON k.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
                 AND k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                WHERE tc.CONSTRAINT_TYPE IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY')
                  AND k.TABLE_SCHEMA = c.TABLE_SCHEMA
                  AND k.TABLE_NAME = c.TABLE_NAME
                  AND k.COLUMN_NAME = c.COLUMN_NAME
            ) THEN 1 ELSE 0 END AS BIT) AS IS_KEY
        FROM INFORMATION_SCHEMA.COLUMNS c
        WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
        ORDER BY c.ORDINAL_POSITION
    "#;

    pub const ROW_COUNT: &str = "SELECT CAST(@@ROWCOUNT AS BIGINT)";
}

// =============================================================================
// Pool
// =============================================================================

/// Opens and recycles tiberius clients for deadpool.
///
/// Recycling drops clients past the idle timeout or max lifetime and, when
/// enabled, pings the server before handing a client out.
pub struct TdsManager {
    config: Config,
    idle_timeout: Duration,
    max_lifetime: Duration,
    test_before_acquire: bool,
}

impl managed::Manager for TdsManager {
    type Type = TdsClient;
    type Error = tiberius::error::Error;

    async fn create(&self) -> Result<TdsClient, Self::Error> {
        let client = open_client(self.config.clone()).await?;
        debug!("Opened SQL Server connection");
        Ok(client)
    }

    async fn recycle(
        &self,
        client: &mut TdsClient,
        metrics: &Metrics,
    ) -> RecycleResult<Self::Error> {
        // last_used counts from the previous checkout
        if metrics.last_used() >= self.idle_timeout {
            return Err(RecycleError::Message("idle timeout elapsed".into()));
        }
        if metrics.age() >= self.max_lifetime {
            return Err(RecycleError::Message("max lifetime reached".into()));
        }
        if self.test_before_acquire {
            client.simple_query("SELECT 1").await?.into_results().await?;
        }
        Ok(())
    }
}

pub struct SqlServerPool {
    pool: managed::Pool<TdsManager>,
}

impl SqlServerPool {
    pub async fn acquire(&self, database: &str) -> DbResult<PooledClient> {
        self.pool
            .get()
            .await
            .map(|client| PooledClient(Some(client)))
            .map_err(|e| pool_error(database, e))
    }

    /// Idle clients are dropped now; checked-out ones when they come back.
    pub async fn close(&self) {
        self.pool.close();
    }
}

fn pool_error(database: &str, err: PoolError<tiberius::error::Error>) -> DbError {
    match err {
        PoolError::Backend(e) => {
            let message = e.to_string();
            DbError::connection(
                database,
                format!("Failed to connect: {}", message),
                connection_suggestion(EngineKind::Sqlserver, &message),
            )
        }
        PoolError::Timeout(_) => DbError::connection(
            database,
            "Timed out opening a connection",
            connection_suggestion(EngineKind::Sqlserver, "timed out"),
        ),
        PoolError::Closed => DbError::cancelled(database, "connection pool is closed"),
        other => DbError::internal(format!("SQL Server pool error: {}", other)),
    }
}

async fn open_client(mut config: Config) -> tiberius::Result<TdsClient> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;

    match Client::connect(config.clone(), tcp.compat_write()).await {
        Ok(client) => Ok(client),
        // Azure SQL may redirect the login to another node.
        Err(tiberius::error::Error::Routing { host, port }) => {
            config.host(&host);
            config.port(port);
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write()).await
        }
        Err(e) => Err(e),
    }
}

/// A client checked out of a [`SqlServerPool`].
///
/// Dropping it hands the client back to deadpool unless it was discarded.
pub struct PooledClient(Option<Object<TdsManager>>);

impl PooledClient {
    pub fn discard(&mut self) {
        if let Some(client) = self.0.take() {
            drop(Object::take(client));
        }
    }

    fn client_mut(&mut self) -> DbResult<&mut TdsClient> {
        self.0
            .as_deref_mut()
            .ok_or_else(|| DbError::internal("SQL Server connection was discarded"))
    }
}

pub(super) async fn connect(config: &DatabaseConfig) -> DbResult<SqlServerPool> {
    let params = &config.params;
    let pool_opts = &config.pool;

    let mut tds = Config::new();
    tds.host(params.host_or_default());
    tds.port(params.port.unwrap_or(1433));
    tds.database(&params.database);
    tds.authentication(AuthMethod::sql_server(
        params.user.as_deref().unwrap_or_default(),
        params.password.as_deref().unwrap_or_default(),
    ));
    tds.encryption(if params.encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    });
    if params.trust_server_certificate {
        tds.trust_cert();
    }
    tds.application_name("multidb-mcp-server");

    let manager = TdsManager {
        config: tds,
        idle_timeout: pool_opts.idle_timeout(),
        max_lifetime: pool_opts.max_lifetime(),
        test_before_acquire: pool_opts.test_before_acquire_or_default(),
    };
    let pool = managed::Pool::builder(manager)
        .max_size(pool_opts.max_connections_or_default(false) as usize)
        .create_timeout(Some(pool_opts.acquire_timeout()))
        .recycle_timeout(Some(pool_opts.acquire_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| DbError::internal(format!("Failed to build SQL Server pool: {}", e)))?;
    let pool = SqlServerPool { pool };

    // deadpool has no minimum size; open the floor up front.
    let mut warm = Vec::new();
    for _ in 0..pool_opts.min_connections_or_default(false) {
        warm.push(pool.acquire(&config.name).await?);
    }
    drop(warm);

    Ok(pool)
}

pub(super) async fn server_version(pool: &SqlServerPool, database: &str) -> DbResult<String> {
    let mut conn = pool.acquire(database).await?;
    let client = conn.client_mut()?;
    let row = client
        .simple_query("SELECT @@VERSION")
        .await
        .map_err(|e| DbError::from_tiberius(database, e))?
        .into_row()
        .await
        .map_err(|e| DbError::from_tiberius(database, e))?;

    Ok(row
        .and_then(|r| r.try_get::<&str, _>(0).ok().flatten().map(str::to_string))
        .map(|v| v.lines().next().unwrap_or_default().trim().to_string())
        .unwrap_or_default())
}

// =============================================================================
// Execution
// =============================================================================

pub(super) async fn execute(
    conn: &mut PooledClient,
    database: &str,
    request: &QueryRequest,
) -> DbResult<RowSet> {
    let limit = request.effective_limit() as usize;
    let client = conn.client_mut()?;

    let mut query = Query::new(request.sql.as_str());
    for param in &request.params {
        bind_sqlserver_param(&mut query, param);
    }

    let mut set = RowSet::default();
    let mut saw_result_set = false;
    {
        let mut stream = query
            .query(client)
            .await
            .map_err(|e| DbError::from_tiberius(database, e))?;

        while let Some(item) = stream
            .try_next()
            .await
            .map_err(|e| DbError::from_tiberius(database, e))?
        {
            match item {
                QueryItem::Metadata(meta) => {
                    saw_result_set = true;
                    let columns = meta
                        .columns()
                        .iter()
                        .map(|c| ColumnMetadata::new(c.name(), sqlserver_type_name(c.column_type())))
                        .collect();
                    set.begin_result_set(columns);
                }
                QueryItem::Row(row) => {
                    if !set.push_row(row.to_json_map(request.decode_binary), limit) {
                        break;
                    }
                }
            }
        }
    }

    if !saw_result_set {
        set.rows_affected = rows_affected(client, database).await?;
    }
    Ok(set)
}

async fn rows_affected(client: &mut TdsClient, database: &str) -> DbResult<u64> {
    let row = client
        .simple_query(queries::ROW_COUNT)
        .await
        .map_err(|e| DbError::from_tiberius(database, e))?
        .into_row()
        .await
        .map_err(|e| DbError::from_tiberius(database, e))?;

    let count = row
        .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
        .unwrap_or(0);
    Ok(count.max(0) as u64)
}

// =============================================================================
// Introspection
// =============================================================================

pub(super) async fn list_schemas(conn: &mut PooledClient, database: &str) -> DbResult<Vec<String>> {
    let rows = fetch_rows(conn, database, queries::LIST_SCHEMAS, &[]).await?;
    Ok(rows.iter().filter_map(|r| text(r, "SCHEMA_NAME")).collect())
}

pub(super) async fn list_tables(
    conn: &mut PooledClient,
    database: &str,
    schema: &str,
) -> DbResult<Vec<TableDescriptor>> {
    let rows = fetch_rows(conn, database, queries::LIST_TABLES, &[&schema]).await?;

    let tables = rows
        .iter()
        .filter_map(|row| {
            let name = text(row, "TABLE_NAME")?;
            let kind = TableKind::parse(&text(row, "TABLE_TYPE").unwrap_or_default());
            let table_schema = text(row, "TABLE_SCHEMA").unwrap_or_else(|| schema.to_string());
            Some(TableDescriptor::new(name, kind).with_schema(table_schema))
        })
        .collect::<Vec<_>>();

    debug!(database, schema, count = tables.len(), "Listed SQL Server tables");
    Ok(tables)
}

pub(super) async fn describe_table(
    conn: &mut PooledClient,
    database: &str,
    table: &str,
    schema: &str,
) -> DbResult<Vec<ColumnDescriptor>> {
    let rows = fetch_rows(conn, database, queries::DESCRIBE_TABLE, &[&schema, &table]).await?;

    let columns = rows
        .iter()
        .filter_map(|row| {
            let name = text(row, "COLUMN_NAME")?;
            let data_type = text(row, "DATA_TYPE").unwrap_or_default();
            let nullable = text(row, "IS_NULLABLE")
                .map(|v| v.eq_ignore_ascii_case("YES"))
                .unwrap_or(true);
            let ordinal = row
                .try_get::<i32, _>("ORDINAL_POSITION")
                .ok()
                .flatten()
                .unwrap_or(0);
            let flag = |col: &str| row.try_get::<bool, _>(col).ok().flatten().unwrap_or(false);

            Some(
                ColumnDescriptor::new(name, data_type.clone(), nullable, ordinal.max(0) as u32)
                    .with_normalized_type(normalize_type_name(EngineKind::Sqlserver, &data_type))
                    .with_default(text(row, "COLUMN_DEFAULT"))
                    .with_max_length(row.try_get::<i64, _>("MAX_LENGTH").ok().flatten())
                    .with_primary_key(flag("IS_PRIMARY_KEY"))
                    .with_key(flag("IS_KEY")),
            )
        })
        .collect::<Vec<_>>();

    debug!(database, schema, table, count = columns.len(), "Described SQL Server table");
    Ok(columns)
}

async fn fetch_rows(
    conn: &mut PooledClient,
    database: &str,
    sql: &str,
    params: &[&dyn tiberius::ToSql],
) -> DbResult<Vec<Row>> {
    let client = conn.client_mut()?;
    let stream = client
        .query(sql, params)
        .await
        .map_err(|e| DbError::from_tiberius(database, e))?;
    stream.into_first_result().await.map_err(|e| {
        warn!(database, error = %e, "SQL Server catalog query failed");
        DbError::from_tiberius(database, e)
    })
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.try_get::<&str, _>(column)
        .ok()
        .flatten()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use deadpool::managed::TimeoutType;

    fn unreachable_pool() -> SqlServerPool {
        let mut config = Config::new();
        config.host("127.0.0.1");
        config.port(1);
        let manager = TdsManager {
            config,
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(600),
            test_before_acquire: true,
        };
        let pool = managed::Pool::builder(manager)
            .max_size(2)
            .create_timeout(Some(Duration::from_secs(2)))
            .runtime(Runtime::Tokio1)
            .build()
            .unwrap();
        SqlServerPool { pool }
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let pool = unreachable_pool();
        let err = pool.acquire("ledger").await.err().unwrap();
        assert_eq!(err.category(), ErrorCategory::ConnectionError);
        assert_eq!(err.database(), Some("ledger"));
    }

    #[tokio::test]
    async fn test_closed_pool_is_cancelled() {
        let pool = unreachable_pool();
        pool.close().await;
        let err = pool.acquire("ledger").await.err().unwrap();
        assert_eq!(err.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn test_pool_timeout_is_connection_error() {
        let err = pool_error("ledger", PoolError::Timeout(TimeoutType::Create));
        assert_eq!(err.category(), ErrorCategory::ConnectionError);
        assert!(err.suggestion().unwrap().contains("acquire_timeout_secs"));
    }
}
