//! Connection pool management.
//!
//! [`ManagedPool`] wraps one driver pool with an admission semaphore so the
//! number of connections checked out never exceeds `max_connections`, and a
//! waiter that cannot be admitted within `acquire_timeout` gets
//! [`DbError::PoolExhausted`]. [`PoolManager`] owns every pool, opens them
//! eagerly or on first use, and drains them on shutdown.

use crate::db::adapters::{DbPool, EngineConnection};
use crate::db::registry::AdapterRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseConfig, DatabaseStatus, DatabaseSummary, EngineKind};
use futures_util::future::join_all;
use schemars::JsonSchema;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to wait for cancelled work to hand its connections back.
const CANCEL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct PoolStats {
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    borrows: AtomicU64,
    discarded: AtomicU64,
    idle: Notify,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct PoolSnapshot {
    pub in_use: usize,
    pub peak_in_use: usize,
    pub max_connections: u32,
    pub borrows: u64,
    pub discarded: u64,
}

/// Tracks one admitted borrower from admission until the lease is gone.
struct InUseGuard(Arc<PoolStats>);

impl InUseGuard {
    fn new(stats: Arc<PoolStats>) -> Self {
        let now = stats.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_in_use.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        if self.0.in_use.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// A bounded pool for one logical database.
pub struct ManagedPool {
    name: String,
    driver: DbPool,
    permits: Arc<Semaphore>,
    max_connections: u32,
    acquire_timeout: Duration,
    stats: Arc<PoolStats>,
}

impl std::fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPool")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

impl ManagedPool {
    /// Open the driver pool for `config`.
    pub async fn open(config: &DatabaseConfig) -> DbResult<Self> {
        let driver = DbPool::connect(config).await?;
        let max_connections = config
            .pool
            .max_connections_or_default(config.kind == EngineKind::Sqlite);

        info!(
            database = %config.name,
            engine = %config.kind,
            max_connections,
            "Connection pool ready"
        );

        Ok(Self {
            name: config.name.clone(),
            driver,
            permits: Arc::new(Semaphore::new(max_connections as usize)),
            max_connections,
            acquire_timeout: config.pool.acquire_timeout(),
            stats: Arc::new(PoolStats::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> EngineKind {
        self.driver.engine()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            in_use: self.stats.in_use.load(Ordering::SeqCst),
            peak_in_use: self.stats.peak_in_use.load(Ordering::SeqCst),
            max_connections: self.max_connections,
            borrows: self.stats.borrows.load(Ordering::SeqCst),
            discarded: self.stats.discarded.load(Ordering::SeqCst),
        }
    }

    /// Check out a connection.
    ///
    /// Waits up to `acquire_timeout` for a free slot, then fails with
    /// [`DbError::PoolExhausted`].
    pub async fn borrow(&self) -> DbResult<PoolLease> {
        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(DbError::cancelled(&self.name, "connection pool is closed"));
            }
            Err(_) => {
                warn!(
                    database = %self.name,
                    max_connections = self.max_connections,
                    "Timed out waiting for a free connection"
                );
                return Err(DbError::pool_exhausted(
                    &self.name,
                    self.acquire_timeout.as_secs(),
                ));
            }
        };

        let in_use = InUseGuard::new(Arc::clone(&self.stats));
        let conn = self.driver.acquire(&self.name).await?;
        self.stats.borrows.fetch_add(1, Ordering::SeqCst);

        Ok(PoolLease {
            conn,
            database: self.name.clone(),
            returned: false,
            stats: Arc::clone(&self.stats),
            _permit: permit,
            _in_use: in_use,
        })
    }

    /// Refuse new borrowers. Waiters already queued fail with `Cancelled`.
    fn stop_admission(&self) {
        self.permits.close();
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.stats.idle.notified();
            if self.stats.in_use.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop admission and close every driver connection.
    pub async fn close(&self) {
        self.stop_admission();
        self.driver.close().await;
        debug!(database = %self.name, "Connection pool closed");
    }
}

/// A connection checked out of a [`ManagedPool`].
///
/// Call [`PoolLease::release`] or [`PoolLease::settle`] to hand the
/// connection back for reuse. A lease dropped any other way discards its
/// connection.
pub struct PoolLease {
    conn: EngineConnection,
    database: String,
    returned: bool,
    stats: Arc<PoolStats>,
    _permit: OwnedSemaphorePermit,
    _in_use: InUseGuard,
}

impl std::fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLease")
            .field("database", &self.database)
            .field("engine", &self.conn.engine())
            .field("returned", &self.returned)
            .finish_non_exhaustive()
    }
}

impl PoolLease {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn connection(&mut self) -> &mut EngineConnection {
        &mut self.conn
    }

    /// Return the connection to the pool for reuse.
    pub fn release(mut self) {
        self.returned = true;
    }

    /// Release on success, discard on any failure, and pass `outcome` through.
    pub fn settle<T>(self, outcome: DbResult<T>) -> DbResult<T> {
        if outcome.is_ok() {
            self.release();
        }
        outcome
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        if !self.returned {
            self.conn.discard();
            self.stats.discarded.fetch_add(1, Ordering::SeqCst);
            debug!(database = %self.database, "Discarding connection");
        }
    }
}

/// Owns every pool and the server-wide shutdown signal.
#[derive(Debug)]
pub struct PoolManager {
    registry: Arc<AdapterRegistry>,
    shutdown: CancellationToken,
    closing: AtomicBool,
}

impl PoolManager {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            shutdown: CancellationToken::new(),
            closing: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Cancelled once the shutdown grace period has elapsed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Try to open every configured pool.
    ///
    /// Failures are logged and left for a lazy retry on first use. Returns
    /// the number of pools that opened.
    pub async fn connect_all(&self) -> usize {
        let attempts = self.registry.handles().map(|handle| async move {
            match handle.pool_or_connect().await {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        database = %handle.name(),
                        engine = %handle.engine(),
                        error = %e,
                        "Database unavailable at startup; will retry on first use"
                    );
                    false
                }
            }
        });

        let connected = join_all(attempts).await.into_iter().filter(|ok| *ok).count();
        info!(
            connected,
            configured = self.registry.len(),
            "Initial connection pass complete"
        );
        connected
    }

    /// Check out a connection for `database`, opening its pool if needed.
    pub async fn borrow(&self, database: &str) -> DbResult<PoolLease> {
        if self.is_closing() {
            return Err(DbError::cancelled(database, "server is shutting down"));
        }
        let handle = self.registry.resolve(database)?;

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                Err(DbError::cancelled(database, "server is shutting down"))
            }
            lease = async {
                let pool = handle.pool_or_connect().await?;
                pool.borrow().await
            } => lease,
        }
    }

    /// Run `operation` under `timeout`, aborting early on shutdown.
    pub async fn supervise<T, F>(
        &self,
        database: &str,
        operation: &str,
        timeout: Duration,
        fut: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DbError::cancelled(database, operation)),
            outcome = tokio::time::timeout(timeout, fut) => match outcome {
                Ok(result) => result,
                Err(_) => Err(DbError::timeout(database, operation, timeout.as_secs())),
            },
        }
    }

    /// Configured databases and whether each currently has an open pool.
    pub fn summaries(&self) -> Vec<DatabaseSummary> {
        let closing = self.is_closing();
        self.registry
            .handles()
            .map(|handle| DatabaseSummary {
                name: handle.name().to_string(),
                engine: handle.engine(),
                status: if handle.pool().is_some() && !closing {
                    DatabaseStatus::Connected
                } else {
                    DatabaseStatus::Disconnected
                },
                database: handle.config().params.database.clone(),
            })
            .collect()
    }

    pub fn snapshot(&self, database: &str) -> Option<PoolSnapshot> {
        let handle = self.registry.resolve(database).ok()?;
        handle.pool().map(|pool| pool.snapshot())
    }

    /// Connections currently checked out across every pool.
    pub fn in_use(&self) -> usize {
        self.open_pools().iter().map(|p| p.snapshot().in_use).sum()
    }

    fn open_pools(&self) -> Vec<Arc<ManagedPool>> {
        self.registry
            .handles()
            .filter_map(|handle| handle.pool().cloned())
            .collect()
    }

    /// Stop admitting work, let in-flight work finish for up to `grace`, then
    /// cancel whatever remains and close every pool.
    pub async fn shutdown(&self, grace: Duration) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let pools = self.open_pools();
        for pool in &pools {
            pool.stop_admission();
        }
        info!(
            in_use = self.in_use(),
            grace_secs = grace.as_secs(),
            "Shutting down; waiting for in-flight work"
        );

        let drained = tokio::time::timeout(grace, join_all(pools.iter().map(|p| p.wait_idle())))
            .await
            .is_ok();
        if !drained {
            warn!(
                in_use = self.in_use(),
                "Grace period elapsed; cancelling in-flight work"
            );
        }
        self.shutdown.cancel();

        if tokio::time::timeout(
            CANCEL_DRAIN_TIMEOUT,
            join_all(pools.iter().map(|p| p.wait_idle())),
        )
        .await
        .is_err()
        {
            warn!(in_use = self.in_use(), "Connections still checked out after cancellation");
        }

        // Pools opened while the first batch drained are closed too.
        for pool in self.open_pools() {
            pool.close().await;
        }
        info!("All connection pools closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::error::ErrorCategory;
    use crate::models::ConnectionParams;

    fn sqlite_config(name: &str, max: u32, acquire_secs: u64) -> DatabaseConfig {
        DatabaseConfig::new(
            name,
            EngineKind::Sqlite,
            ConnectionParams::sqlite(":memory:"),
            PoolOptions {
                max_connections: Some(max),
                acquire_timeout_secs: Some(acquire_secs),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_borrow_beyond_max_is_pool_exhausted() {
        let pool = ManagedPool::open(&sqlite_config("mem", 1, 1)).await.unwrap();

        let held = pool.borrow().await.unwrap();
        assert!(format!("{:?}", held).contains("\"mem\""));
        let err = pool.borrow().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::PoolExhausted);
        assert_eq!(pool.snapshot().in_use, 1);

        held.release();
        let again = pool.borrow().await.unwrap();
        again.release();
        assert_eq!(pool.snapshot().in_use, 0);
        assert_eq!(pool.snapshot().peak_in_use, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_dropped_lease_is_discarded() {
        let pool = ManagedPool::open(&sqlite_config("mem", 1, 5)).await.unwrap();

        let lease = pool.borrow().await.unwrap();
        drop(lease);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.in_use, 0);
        assert_eq!(snapshot.discarded, 1);

        let lease = pool.borrow().await.unwrap();
        lease.release();
        assert_eq!(pool.snapshot().discarded, 1);
        assert_eq!(pool.snapshot().borrows, 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_settle_discards_after_error() {
        let pool = ManagedPool::open(&sqlite_config("mem", 1, 5)).await.unwrap();

        let lease = pool.borrow().await.unwrap();
        assert_eq!(lease.settle(Ok::<_, DbError>(7)).unwrap(), 7);
        assert_eq!(pool.snapshot().discarded, 0);

        let lease = pool.borrow().await.unwrap();
        let outcome: DbResult<()> = Err(DbError::query("mem", "no such table: t", None));
        assert!(lease.settle(outcome).is_err());
        assert_eq!(pool.snapshot().discarded, 1);
        assert_eq!(pool.snapshot().in_use, 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_borrowers() {
        let pool = ManagedPool::open(&sqlite_config("mem", 2, 5)).await.unwrap();
        pool.close().await;
        let err = pool.borrow().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Cancelled);
    }

    #[tokio::test]
    async fn test_supervise_times_out() {
        let registry = AdapterRegistry::new(vec![]).unwrap();
        let manager = PoolManager::new(Arc::new(registry));
        let err = manager
            .supervise("db", "query", Duration::from_millis(20), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, DbError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn test_borrow_after_shutdown_is_cancelled() {
        let registry = AdapterRegistry::new(vec![sqlite_config("mem", 1, 5)]).unwrap();
        let manager = PoolManager::new(Arc::new(registry));
        assert_eq!(manager.connect_all().await, 1);

        manager.shutdown(Duration::from_millis(100)).await;
        let err = manager.borrow("mem").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Cancelled);
        assert_eq!(manager.in_use(), 0);
        assert!(
            manager
                .summaries()
                .iter()
                .all(|s| s.status == DatabaseStatus::Disconnected)
        );
    }
}
