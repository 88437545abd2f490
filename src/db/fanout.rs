//! Fan-out of one query to many databases.
//!
//! Each target runs on its own task through [`QueryExecutor`], so one slow or
//! failing database never holds up or fails the others. The combined result
//! always has exactly one entry per distinct requested name.

use crate::db::executor::QueryExecutor;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseOutcome, QueryRequest};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Runs a query on several databases concurrently.
#[derive(Debug, Clone)]
pub struct FanOutCoordinator {
    executor: Arc<QueryExecutor>,
    overall_timeout: Duration,
}

impl FanOutCoordinator {
    pub fn new(executor: Arc<QueryExecutor>, overall_timeout: Duration) -> Self {
        Self {
            executor,
            overall_timeout,
        }
    }

    /// Run `request` on every database in `databases`.
    ///
    /// Duplicate names run once. Targets still running when the overall
    /// timeout expires are aborted and reported as timeouts.
    pub async fn run_query_many(
        &self,
        databases: &[String],
        request: &QueryRequest,
    ) -> DbResult<BTreeMap<String, DatabaseOutcome>> {
        let targets: BTreeSet<String> = databases
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if targets.is_empty() {
            return Err(DbError::invalid_input(
                "At least one database name is required",
            ));
        }
        if request.sql.trim().is_empty() {
            return Err(DbError::invalid_input("SQL query cannot be empty"));
        }

        debug!(targets = targets.len(), "Fanning out query");

        let mut tasks = JoinSet::new();
        for name in &targets {
            let executor = Arc::clone(&self.executor);
            let request = request.clone();
            let name = name.clone();
            tasks.spawn(async move {
                let result = executor.run_query(&name, &request).await;
                (name, result)
            });
        }

        let deadline = Instant::now() + self.overall_timeout;
        let mut outcomes = BTreeMap::new();
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((name, result)))) => {
                    let outcome = DatabaseOutcome::from_result(&name, result);
                    outcomes.insert(name, outcome);
                }
                Ok(Some(Err(join_err))) => {
                    error!(error = %join_err, "Fan-out task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            warn!(
                pending = tasks.len(),
                timeout_secs = self.overall_timeout.as_secs(),
                "Fan-out deadline reached; aborting remaining targets"
            );
            tasks.shutdown().await;
        }

        for name in targets {
            if outcomes.contains_key(&name) {
                continue;
            }
            let err = if timed_out {
                DbError::timeout(&name, "multi-database query", self.overall_timeout.as_secs())
            } else {
                DbError::internal(format!("Query task for '{}' did not complete", name))
            };
            let outcome = DatabaseOutcome::from_result(&name, Err(err));
            outcomes.insert(name, outcome);
        }

        Ok(outcomes)
    }
}
