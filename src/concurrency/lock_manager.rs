use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, warn};

use super::lock::{Lock, LockMode};
use super::TransactionId;
use crate::common::PageId;
use crate::error::DbError;

/// How long a transaction waits for a lock before it is aborted.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);
/// How often a waiting transaction re-checks its request.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct LockTable {
    page_locks: HashMap<PageId, Lock>,
    /// pages each transaction holds a lock on
    transaction_locks: HashMap<TransactionId, HashSet<PageId>>,
}

impl LockTable {
    fn try_grant(&mut self, tid: TransactionId, page_id: PageId, mode: LockMode) -> bool {
        let granted = match self.page_locks.entry(page_id) {
            Entry::Occupied(mut lock) => lock.get_mut().try_grant(tid, mode),
            Entry::Vacant(vacant) => {
                vacant.insert(Lock::new(tid, mode));
                true
            }
        };
        if granted {
            self.transaction_locks
                .entry(tid)
                .or_default()
                .insert(page_id);
        }
        granted
    }

    fn release(&mut self, tid: TransactionId, page_id: PageId) {
        if let Entry::Occupied(mut lock) = self.page_locks.entry(page_id) {
            if lock.get_mut().release(tid) {
                lock.remove();
            }
        }
        if let Entry::Occupied(mut pages) = self.transaction_locks.entry(tid) {
            pages.get_mut().remove(&page_id);
            if pages.get().is_empty() {
                pages.remove();
            }
        }
    }
}

/// Page level lock manager implementing strict two-phase locking.
///
/// There is no deadlock detection. A request which can't be granted within the timeout
/// aborts the requesting transaction.
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    timeout: Duration,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            timeout,
            poll_interval,
        }
    }

    /// Blocks until the lock is granted. Fails with `DbError::TransactionAborted` once the
    /// request waited longer than the timeout. A failed request leaves no trace in the lock table.
    pub fn acquire(&self, tid: TransactionId, page_id: PageId, mode: LockMode) -> Result<()> {
        let start = Instant::now();
        let mut table = self.table.lock().unwrap();
        loop {
            if table.try_grant(tid, page_id, mode) {
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                warn!(
                    "Transaction {} timed out waiting for {:?} lock on page {}",
                    tid, mode, page_id
                );
                return Err(DbError::TransactionAborted.into());
            }
            let (guard, _) = self
                .released
                .wait_timeout(table, self.poll_interval)
                .unwrap();
            table = guard;
        }
    }

    /// Releases the lock of a transaction on a page and wakes up all waiters.
    pub fn release(&self, tid: TransactionId, page_id: PageId) {
        let mut table = self.table.lock().unwrap();
        table.release(tid, page_id);
        self.released.notify_all();
    }

    /// Releases every lock the transaction holds.
    pub fn release_all(&self, tid: TransactionId) {
        let mut table = self.table.lock().unwrap();
        if let Some(pages) = table.transaction_locks.remove(&tid) {
            debug!("Releasing {} locks of transaction {}", pages.len(), tid);
            for page_id in pages {
                table.release(tid, page_id);
            }
        }
        self.released.notify_all();
    }

    pub fn holds(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_mode(tid, page_id).is_some()
    }

    pub fn holds_any(&self, tid: TransactionId) -> bool {
        let table = self.table.lock().unwrap();
        table.transaction_locks.contains_key(&tid)
    }

    pub fn lock_mode(&self, tid: TransactionId, page_id: PageId) -> Option<LockMode> {
        let table = self.table.lock().unwrap();
        table
            .page_locks
            .get(&page_id)
            .and_then(|lock| lock.mode_of(tid))
    }

    /// Pages the transaction holds an exclusive lock on, including upgraded ones.
    pub fn exclusively_locked(&self, tid: TransactionId) -> Vec<PageId> {
        let table = self.table.lock().unwrap();
        match table.transaction_locks.get(&tid) {
            Some(pages) => pages
                .iter()
                .filter(|page_id| {
                    table
                        .page_locks
                        .get(page_id)
                        .and_then(|lock| lock.mode_of(tid))
                        == Some(LockMode::Exclusive)
                })
                .copied()
                .collect(),
            None => vec![],
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}
