use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use log::warn;

use crate::buffer::buffer_pool::BufferPool;

pub mod lock;
pub mod lock_manager;

pub use lock::LockMode;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-wide unique transaction id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A running transaction. It has to be finished with `commit` or `abort`;
/// a transaction which is dropped without either is aborted.
pub struct Transaction<'a> {
    tid: TransactionId,
    buffer_pool: &'a BufferPool,
    completed: bool,
}

impl<'a> Transaction<'a> {
    pub fn new(buffer_pool: &'a BufferPool) -> Self {
        Self {
            tid: TransactionId::new(),
            buffer_pool,
            completed: false,
        }
    }

    /// Returns its own transaction id
    pub fn tid(&self) -> TransactionId {
        self.tid
    }

    /// Writes all pages dirtied by this transaction to disk and releases its locks.
    pub fn commit(mut self) -> Result<()> {
        self.completed = true;
        self.buffer_pool.transaction_complete(self.tid, true)
    }

    /// Drops all pages dirtied by this transaction from the buffer pool and releases its locks.
    pub fn abort(mut self) -> Result<()> {
        self.completed = true;
        self.buffer_pool.transaction_complete(self.tid, false)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.completed {
            if let Err(e) = self.buffer_pool.transaction_complete(self.tid, false) {
                warn!("Failed to abort transaction {}: {e:#}", self.tid);
            }
        }
    }
}
