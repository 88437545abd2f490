//! Adapter registry.
//!
//! Maps logical database names to their configuration and lazily created
//! pool. The set of names is fixed when the registry is built.

use crate::db::pool::ManagedPool;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseConfig, EngineKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// One configured database and its pool, once opened.
#[derive(Debug)]
pub struct AdapterHandle {
    config: DatabaseConfig,
    pool: OnceCell<Arc<ManagedPool>>,
}

impl AdapterHandle {
    fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn engine(&self) -> EngineKind {
        self.config.kind
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The open pool, if a connection attempt has succeeded.
    pub fn pool(&self) -> Option<&Arc<ManagedPool>> {
        self.pool.get()
    }

    /// Return the pool, opening it on first use.
    ///
    /// A failed attempt leaves the handle empty, so the next call retries.
    /// Concurrent callers share one attempt.
    pub async fn pool_or_connect(&self) -> DbResult<Arc<ManagedPool>> {
        self.pool
            .get_or_try_init(|| async { ManagedPool::open(&self.config).await.map(Arc::new) })
            .await
            .cloned()
    }
}

/// Immutable name-to-adapter mapping.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    handles: HashMap<String, Arc<AdapterHandle>>,
    order: Vec<String>,
}

impl AdapterRegistry {
    /// Build a registry. Names must be unique.
    pub fn new(configs: Vec<DatabaseConfig>) -> DbResult<Self> {
        let mut handles = HashMap::with_capacity(configs.len());
        let mut order = Vec::with_capacity(configs.len());

        for config in configs {
            if handles.contains_key(&config.name) {
                return Err(DbError::config(format!(
                    "Duplicate database name '{}'",
                    config.name
                )));
            }
            order.push(config.name.clone());
            handles.insert(config.name.clone(), Arc::new(AdapterHandle::new(config)));
        }

        Ok(Self { handles, order })
    }

    /// Look up a database by its logical name.
    pub fn resolve(&self, name: &str) -> DbResult<Arc<AdapterHandle>> {
        self.handles
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::database_not_found(name, self.order.clone()))
    }

    /// Names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Handles in configuration order.
    pub fn handles(&self) -> impl Iterator<Item = &Arc<AdapterHandle>> {
        self.order.iter().filter_map(|name| self.handles.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
