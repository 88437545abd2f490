//! Query execution engine.
//!
//! Runs one statement (or script) against one logical database:
//! - Borrows a connection from the database's pool
//! - Enforces the per-request timeout and the server-wide shutdown signal
//! - Returns the connection on success and discards it on any failure
//!
//! There are no automatic retries. A failed query is reported as-is.

use crate::db::pool::PoolManager;
use crate::error::{DbError, DbResult};
use crate::models::{QueryRequest, QueryResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Executes queries against configured databases.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pools: Arc<PoolManager>,
    default_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pools: Arc<PoolManager>, default_timeout: Duration) -> Self {
        Self {
            pools,
            default_timeout,
        }
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `request` against `database`.
    pub async fn run_query(&self, database: &str, request: &QueryRequest) -> DbResult<QueryResult> {
        if request.sql.trim().is_empty() {
            return Err(DbError::invalid_input("SQL query cannot be empty"));
        }
        let timeout = request.effective_timeout(self.default_timeout);

        debug!(
            database,
            params = request.params.len(),
            limit = request.effective_limit(),
            timeout_secs = timeout.as_secs(),
            "Executing query"
        );

        let mut lease = self.pools.borrow(database).await?;
        let outcome = self
            .pools
            .supervise(
                database,
                "query",
                timeout,
                lease.connection().execute(database, request),
            )
            .await;

        if let Err(e) = &outcome {
            warn!(database, category = %e.category(), error = %e, "Query failed");
        }
        let result = lease.settle(outcome)?;

        debug!(
            database,
            rows = result.row_count(),
            rows_affected = ?result.rows_affected,
            truncated = result.truncated,
            elapsed_ms = result.execution_time_ms,
            "Query completed"
        );
        Ok(result)
    }
}
