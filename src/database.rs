use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::buffer::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::common::{DEFAULT_PAGE_SIZE, DEFAULT_POOL_SIZE};
use crate::concurrency::lock_manager::{LockManager, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::concurrency::Transaction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub page_size: usize,
    pub pool_size: usize,
    pub lock_timeout: Duration,
    pub lock_poll_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl DatabaseConfig {
    /// Files written with one page size cannot be read with another. Meant for tests.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_lock_poll_interval(mut self, lock_poll_interval: Duration) -> Self {
        self.lock_poll_interval = lock_poll_interval;
        self
    }
}

/// Everything needed to access tables: the catalog and the buffer pool in front of it.
/// Constructed once and shared by all transactions.
pub struct Database {
    config: DatabaseConfig,
    catalog: Arc<Catalog>,
    buffer_pool: BufferPool,
}

impl Database {
    /// Fails if the configured pool cannot hold a single page.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        let catalog = Arc::new(Catalog::new(config.page_size));
        let lock_manager = LockManager::new(config.lock_timeout, config.lock_poll_interval);
        let buffer_pool = BufferPool::new(Arc::clone(&catalog), lock_manager, config.pool_size)
            .with_context(|| format!("Invalid pool size {}", config.pool_size))?;

        Ok(Self {
            config,
            catalog,
            buffer_pool,
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn begin(&self) -> Transaction {
        Transaction::new(&self.buffer_pool)
    }
}
