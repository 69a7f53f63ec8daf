use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::{Context, Error, Result};
use log::debug;

use super::usage_replacer::UsageReplacer;
use crate::catalog::Catalog;
use crate::common::{PageId, RecordId, TableId};
use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::{LockMode, TransactionId};
use crate::error::DbError;
use crate::storage::{PageRef, Permissions};
use crate::tuple::Tuple;

struct PoolState {
    pages: HashMap<PageId, PageRef>,
    replacer: UsageReplacer,
}

/// BufferPool caches a bounded number of pages in memory and is the only way to access pages.
///
/// Before a page is handed out, the requesting transaction gets the matching lock from the
/// lock manager. Dirty pages are never evicted, they are only written when their transaction
/// commits. Consequently aborting a transaction only needs to drop its pages from the cache.
pub struct BufferPool {
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Creates a pool holding at most `capacity` pages. Fails if `capacity` is zero.
    pub fn new(
        catalog: Arc<Catalog>,
        lock_manager: LockManager,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::msg("The buffer pool needs room for at least one page"));
        }

        Ok(Self {
            catalog,
            lock_manager,
            capacity,
            state: Mutex::new(PoolState {
                pages: HashMap::with_capacity(capacity),
                replacer: UsageReplacer::new(),
            }),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the page with the requested permissions. Acquires a shared lock for read-only
    /// and an exclusive lock for read-write access first, which may block.
    /// If the page is not cached and the pool is full, a clean page is evicted.
    pub fn get_page(
        &self,
        tid: TransactionId,
        page_id: PageId,
        permissions: Permissions,
    ) -> Result<PageRef> {
        let mode = match permissions {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        };
        self.lock_manager.acquire(tid, page_id, mode)?;

        let mut state = self.state.lock().unwrap();
        if let Some(page) = state.pages.get(&page_id).cloned() {
            state.replacer.record_access(page_id);
            return Ok(page);
        }

        if state.pages.len() >= self.capacity {
            self.evict_page(&mut state)?;
        }
        let file = self.catalog.get_file(page_id.table_id())?;
        let page = file
            .read_page(page_id)
            .with_context(|| format!("Could not load page {page_id}"))?;
        debug!("Loaded page {} into the buffer pool", page_id);

        let page = Arc::new(RwLock::new(page));
        state.pages.insert(page_id, Arc::clone(&page));
        state.replacer.record_access(page_id);
        Ok(page)
    }

    /// Releases the lock of a transaction on a page before the transaction ends.
    /// This breaks two-phase locking, use with care.
    pub fn release_page(&self, tid: TransactionId, page_id: PageId) {
        self.lock_manager.release(tid, page_id)
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds(tid, page_id)
    }

    /// Inserts the tuple into a table. The dirtied page is marked dirty by the transaction
    /// and replaces any cached version.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: Tuple,
    ) -> Result<RecordId> {
        let file = self.catalog.get_file(table_id)?;
        let (record_id, dirtied) = file.insert_tuple(self, tid, tuple)?;
        self.install_dirtied_pages(tid, dirtied)?;
        Ok(record_id)
    }

    /// Deletes a tuple previously read from a table.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id().ok_or_else(|| {
            DbError::InvalidReference(format!("tuple ({tuple}) is not stored on any page"))
        })?;
        self.delete_record(tid, record_id)
    }

    /// Deletes the tuple stored at `record_id`.
    pub fn delete_record(&self, tid: TransactionId, record_id: RecordId) -> Result<()> {
        let file = self.catalog.get_file(record_id.page_id().table_id())?;
        let dirtied = file.delete_tuple(self, tid, record_id)?;
        self.install_dirtied_pages(tid, dirtied)
    }

    fn install_dirtied_pages(&self, tid: TransactionId, dirtied: Vec<PageRef>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for page in dirtied {
            let page_id = {
                let mut guard = page.write().unwrap();
                guard.mark_dirty(Some(tid));
                guard.id()
            };
            // the page might have been evicted before it got dirty
            if !state.pages.contains_key(&page_id) {
                if state.pages.len() >= self.capacity {
                    self.evict_page(&mut state)?;
                }
                state.replacer.record_access(page_id);
            }
            state.pages.insert(page_id, page);
        }
        Ok(())
    }

    /// Writes the page to disk if it is cached and dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let state = self.state.lock().unwrap();
        self.flush_cached_page(&state, page_id)
    }

    fn flush_cached_page(&self, state: &MutexGuard<PoolState>, page_id: PageId) -> Result<()> {
        if let Some(page) = state.pages.get(&page_id) {
            let mut page = page.write().unwrap();
            if page.is_dirty() {
                let file = self.catalog.get_file(page_id.table_id())?;
                file.write_page(&page)
                    .with_context(|| format!("Could not flush page {page_id}"))?;
                page.mark_dirty(None);
                debug!("Flushed page {}", page_id);
            }
        }
        Ok(())
    }

    /// Writes every page the transaction holds an exclusive lock on.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        let pages = self.lock_manager.exclusively_locked(tid);
        let state = self.state.lock().unwrap();
        for page_id in pages {
            self.flush_cached_page(&state, page_id)?;
        }
        Ok(())
    }

    /// Writes all dirty pages to disk.
    /// This writes uncommitted changes as well, so only call it while no transaction is running.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        let page_ids = state.pages.keys().copied().collect::<Vec<_>>();
        for page_id in page_ids {
            self.flush_cached_page(&state, page_id)?;
        }
        Ok(())
    }

    /// Removes the page from the cache without writing it.
    pub fn discard_page(&self, page_id: PageId) {
        let mut state = self.state.lock().unwrap();
        Self::remove_page(&mut state, page_id);
    }

    fn remove_page(state: &mut MutexGuard<PoolState>, page_id: PageId) {
        state.pages.remove(&page_id);
        state.replacer.remove(page_id);
    }

    /// Evicts the least used clean page. Fails with `DbError::AllPagesDirty` if every page is dirty.
    /// Pages whose guard is currently held by a caller are never chosen.
    fn evict_page(&self, state: &mut MutexGuard<PoolState>) -> Result<()> {
        let victim = {
            let pages = &state.pages;
            state.replacer.pick_victim(|page_id| {
                pages
                    .get(&page_id)
                    .and_then(|page| page.try_read().ok().map(|page| !page.is_dirty()))
                    .unwrap_or(false)
            })
        };
        let victim = victim.ok_or(DbError::AllPagesDirty)?;

        // clean, so there is nothing to write
        Self::remove_page(state, victim);
        debug!("Evicted page {}", victim);
        Ok(())
    }

    /// Finishes a transaction. On commit all pages it locked exclusively are written to disk,
    /// on abort they are dropped from the cache. Afterwards all its locks are released.
    /// If writing fails, the remaining pages of the transaction are dropped and the error is returned.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let pages = self.lock_manager.exclusively_locked(tid);
        let result = if commit {
            self.flush_pages(tid)
        } else {
            debug!("Aborting transaction {}", tid);
            Ok(())
        };

        if !commit || result.is_err() {
            let mut state = self.state.lock().unwrap();
            for page_id in pages {
                Self::remove_page(&mut state, page_id);
            }
        }

        self.lock_manager.release_all(tid);
        result.with_context(|| format!("Failed to commit transaction {tid}"))
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        let state = self.state.lock().unwrap();
        state.pages.contains_key(&page_id)
    }

    pub fn num_cached_pages(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::Result;
    use rand::Rng;
    use tempfile::tempdir;

    use crate::common::{PageId, TableId};
    use crate::concurrency::TransactionId;
    use crate::database::{Database, DatabaseConfig};
    use crate::error::DbError;
    use crate::storage::heap::page::HeapPage;
    use crate::storage::Permissions;
    use crate::tuple::schema::{ColumnDefinition, Schema, TypeId};
    use crate::tuple::value::Value;
    use crate::tuple::Tuple;

    fn int_schema() -> Schema {
        Schema::new(vec![ColumnDefinition::new(TypeId::Integer, "id")])
    }

    fn int_tuple(i: i32) -> Tuple {
        Tuple::new(vec![Value::Integer(i)])
    }

    /// Creates a table whose data file consists of `pages` empty pages.
    fn table_with_empty_pages(
        db: &Database,
        dir: &Path,
        name: &str,
        pages: usize,
    ) -> Result<TableId> {
        let path = dir.join(format!("{name}.dat"));
        fs::write(&path, vec![0u8; pages * db.config().page_size])?;
        db.catalog().add_table(name, path, int_schema(), "id")
    }

    fn count_tuples(db: &Database, table_id: TableId) -> Result<usize> {
        let transaction = db.begin();
        let file = db.catalog().get_file(table_id)?;
        let count = file
            .as_heap()
            .iter(db.buffer_pool(), transaction.tid())?
            .collect::<Result<Vec<_>>>()?
            .len();
        transaction.commit()?;
        Ok(count)
    }

    #[test]
    fn get_page_caches_pages() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default().with_pool_size(2))?;
        let table_id = table_with_empty_pages(&db, data_dir.path(), "t", 1)?;
        let page_id = PageId::new(table_id, 0);
        let pool = db.buffer_pool();

        let tid = TransactionId::new();
        let first = pool.get_page(tid, page_id, Permissions::ReadOnly)?;
        let second = pool.get_page(tid, page_id, Permissions::ReadOnly)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.num_cached_pages(), 1);
        assert!(pool.holds_lock(tid, page_id));

        pool.transaction_complete(tid, true)?;
        assert!(!pool.holds_lock(tid, page_id));
        // clean pages stay cached after the transaction
        assert!(pool.is_cached(page_id));
        Ok(())
    }

    #[test]
    fn eviction_never_selects_dirty_pages() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default().with_pool_size(1))?;
        let table_id = table_with_empty_pages(&db, data_dir.path(), "t", 2)?;
        let pool = db.buffer_pool();
        let tid = TransactionId::new();

        let page = pool.get_page(tid, PageId::new(table_id, 0), Permissions::ReadWrite)?;
        page.write()
            .unwrap()
            .as_heap_mut()
            .insert_tuple(tid, int_tuple(1))?;
        drop(page);

        let err = pool
            .get_page(tid, PageId::new(table_id, 1), Permissions::ReadOnly)
            .unwrap_err();
        assert!(matches!(
            DbError::from_anyhow(&err),
            Some(DbError::AllPagesDirty)
        ));
        assert!(pool.is_cached(PageId::new(table_id, 0)));
        assert!(!pool.is_cached(PageId::new(table_id, 1)));
        Ok(())
    }

    #[test]
    fn evicts_least_used_clean_page() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default().with_pool_size(2))?;
        let table_id = table_with_empty_pages(&db, data_dir.path(), "t", 3)?;
        let pool = db.buffer_pool();
        let tid = TransactionId::new();
        let pages = (0..3)
            .map(|page_no| PageId::new(table_id, page_no))
            .collect::<Vec<_>>();

        pool.get_page(tid, pages[0], Permissions::ReadOnly)?;
        pool.get_page(tid, pages[0], Permissions::ReadOnly)?;
        pool.get_page(tid, pages[1], Permissions::ReadOnly)?;
        pool.get_page(tid, pages[2], Permissions::ReadOnly)?;

        assert_eq!(pool.num_cached_pages(), 2);
        assert!(pool.is_cached(pages[0]));
        assert!(!pool.is_cached(pages[1]));
        assert!(pool.is_cached(pages[2]));
        Ok(())
    }

    #[test]
    fn eviction_skips_guarded_pages() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default().with_pool_size(2))?;
        let table_id = table_with_empty_pages(&db, data_dir.path(), "t", 3)?;
        let pool = db.buffer_pool();
        let tid = TransactionId::new();
        let pages = (0..3)
            .map(|page_no| PageId::new(table_id, page_no))
            .collect::<Vec<_>>();

        let guarded = pool.get_page(tid, pages[0], Permissions::ReadWrite)?;
        pool.get_page(tid, pages[1], Permissions::ReadOnly)?;
        pool.get_page(tid, pages[1], Permissions::ReadOnly)?;

        // the least used page is guarded, so the other one has to go
        let guard = guarded.write().unwrap();
        pool.get_page(tid, pages[2], Permissions::ReadOnly)?;
        drop(guard);

        assert!(pool.is_cached(pages[0]));
        assert!(!pool.is_cached(pages[1]));
        assert!(pool.is_cached(pages[2]));
        pool.transaction_complete(tid, true)?;
        Ok(())
    }

    #[test]
    fn commit_flushes_and_abort_discards() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default())?;
        let table_id = table_with_empty_pages(&db, data_dir.path(), "t", 2)?;
        let pool = db.buffer_pool();
        let file = db.catalog().get_file(table_id)?;
        let page_id = PageId::new(table_id, 0);

        let committed = db.begin();
        pool.insert_tuple(committed.tid(), table_id, int_tuple(1))?;
        // only read, so it is neither flushed nor discarded
        pool.get_page(
            committed.tid(),
            PageId::new(table_id, 1),
            Permissions::ReadOnly,
        )?;
        assert_eq!(
            pool.lock_manager().exclusively_locked(committed.tid()),
            vec![page_id]
        );
        // nothing reaches the disk before commit
        assert_eq!(file.as_heap().read_page(page_id)?.iter().count(), 0);
        committed.commit()?;

        let on_disk = file.as_heap().read_page(page_id)?;
        assert_eq!(on_disk.iter().map(|t| t.as_i32(0)).collect::<Vec<_>>(), vec![1]);
        let reader = db.begin();
        let page = pool.get_page(reader.tid(), page_id, Permissions::ReadOnly)?;
        assert!(!page.read().unwrap().is_dirty());
        drop(page);
        reader.commit()?;

        let aborted = db.begin();
        let tid = aborted.tid();
        pool.insert_tuple(tid, table_id, int_tuple(2))?;
        assert!(pool.is_cached(page_id));
        aborted.abort()?;

        assert!(!pool.is_cached(page_id));
        assert!(pool.is_cached(PageId::new(table_id, 1)));
        assert!(!pool.lock_manager().holds_any(tid));
        assert_eq!(file.as_heap().read_page(page_id)?.iter().count(), 1);
        Ok(())
    }

    #[test]
    fn insert_allocates_page_when_full() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default())?;
        let path = data_dir.path().join("t.dat");
        let table_id = db.catalog().add_table("t", &path, int_schema(), "id")?;
        let pool = db.buffer_pool();
        let file = db.catalog().get_file(table_id)?;
        assert_eq!(HeapPage::num_slots(4096, 4), 992);

        let transaction = db.begin();
        for i in 0..992 {
            let record_id = pool.insert_tuple(transaction.tid(), table_id, int_tuple(i))?;
            assert_eq!(record_id.page_id().page_no(), 0);
        }
        assert_eq!(file.as_heap().num_pages()?, 1);

        let record_id = pool.insert_tuple(transaction.tid(), table_id, int_tuple(992))?;
        assert_eq!(record_id.page_id().page_no(), 1);
        assert_eq!(record_id.slot(), 0);
        assert_eq!(file.as_heap().num_pages()?, 2);
        transaction.commit()?;

        assert_eq!(fs::metadata(&path)?.len(), 2 * 4096);
        assert_eq!(count_tuples(&db, table_id)?, 993);
        Ok(())
    }

    #[test]
    fn num_pages_follows_file_size() -> Result<()> {
        let data_dir = tempdir()?;
        let page_size = 256;
        let db = Database::new(DatabaseConfig::default().with_page_size(page_size))?;
        let path = data_dir.path().join("t.dat");
        let table_id = db.catalog().add_table("t", &path, int_schema(), "id")?;
        let file = db.catalog().get_file(table_id)?;
        let pool = db.buffer_pool();

        let mut rng = rand::thread_rng();
        let mut stored = vec![];
        for i in 0..500 {
            let transaction = db.begin();
            if stored.is_empty() || rng.gen_bool(0.7) {
                stored.push(pool.insert_tuple(transaction.tid(), table_id, int_tuple(i))?);
            } else {
                let record_id = stored.swap_remove(rng.gen_range(0..stored.len()));
                pool.delete_record(transaction.tid(), record_id)?;
            }
            transaction.commit()?;

            let len = fs::metadata(&path)?.len();
            assert_eq!(
                file.as_heap().num_pages()? as u64,
                len.div_ceil(page_size as u64)
            );
        }
        assert_eq!(count_tuples(&db, table_id)?, stored.len());
        Ok(())
    }

    #[test]
    fn delete_tuple_removes_scanned_tuple() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default())?;
        let table_id =
            db.catalog()
                .add_table("t", data_dir.path().join("t.dat"), int_schema(), "id")?;
        let pool = db.buffer_pool();

        let transaction = db.begin();
        for i in 0..10 {
            pool.insert_tuple(transaction.tid(), table_id, int_tuple(i))?;
        }
        transaction.commit()?;

        let transaction = db.begin();
        let file = db.catalog().get_file(table_id)?;
        let to_delete = file
            .as_heap()
            .iter(pool, transaction.tid())?
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|tuple| tuple.as_i32(0) % 2 == 0)
            .collect::<Vec<_>>();
        for tuple in &to_delete {
            pool.delete_tuple(transaction.tid(), tuple)?;
        }
        // deleting twice references a free slot
        let err = pool.delete_tuple(transaction.tid(), &to_delete[0]).unwrap_err();
        assert!(matches!(
            DbError::from_anyhow(&err),
            Some(DbError::InvalidReference(_))
        ));
        // a tuple which was never stored can't be deleted
        assert!(pool.delete_tuple(transaction.tid(), &int_tuple(1)).is_err());
        transaction.commit()?;

        assert_eq!(count_tuples(&db, table_id)?, 5);
        Ok(())
    }

    #[test]
    fn conflicting_transaction_is_aborted() -> Result<()> {
        let data_dir = tempdir()?;
        let timeout = Duration::from_millis(100);
        let db = Database::new(DatabaseConfig::default().with_lock_timeout(timeout))?;
        let table_id = table_with_empty_pages(&db, data_dir.path(), "t", 1)?;
        let pool = db.buffer_pool();
        let page_id = PageId::new(table_id, 0);

        let writer = db.begin();
        pool.insert_tuple(writer.tid(), table_id, int_tuple(1))?;

        let reader = db.begin();
        let start = Instant::now();
        let err = pool
            .get_page(reader.tid(), page_id, Permissions::ReadOnly)
            .unwrap_err();
        assert!(DbError::is_abort(&err));
        assert!(start.elapsed() < Duration::from_secs(1));
        reader.abort()?;

        // the failed request did not touch the writer's page
        assert!(pool.is_cached(page_id));
        writer.commit()?;
        assert_eq!(count_tuples(&db, table_id)?, 1);
        Ok(())
    }

    #[test]
    fn dropped_transaction_is_aborted() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default())?;
        let table_id = table_with_empty_pages(&db, data_dir.path(), "t", 1)?;
        let pool = db.buffer_pool();

        let tid = {
            let transaction = db.begin();
            pool.insert_tuple(transaction.tid(), table_id, int_tuple(1))?;
            transaction.tid()
        };

        assert!(!pool.lock_manager().holds_any(tid));
        assert!(!pool.is_cached(PageId::new(table_id, 0)));
        assert_eq!(count_tuples(&db, table_id)?, 0);
        Ok(())
    }

    #[test]
    fn concurrent_transactions_on_separate_tables() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default().with_pool_size(8))?;
        let tables = (0..4)
            .map(|i| {
                db.catalog().add_table(
                    &format!("t{i}"),
                    data_dir.path().join(format!("t{i}.dat")),
                    int_schema(),
                    "id",
                )
            })
            .collect::<Result<Vec<_>>>()?;

        thread::scope(|scope| {
            for table_id in &tables {
                let db = &db;
                scope.spawn(move || {
                    for i in 0..200 {
                        let transaction = db.begin();
                        db.buffer_pool()
                            .insert_tuple(transaction.tid(), *table_id, int_tuple(i))
                            .unwrap();
                        transaction.commit().unwrap();
                    }
                });
            }
        });

        for table_id in tables {
            assert_eq!(count_tuples(&db, table_id)?, 200);
        }
        Ok(())
    }

    #[test]
    fn flush_page_is_idempotent() -> Result<()> {
        let data_dir = tempdir()?;
        let db = Database::new(DatabaseConfig::default())?;
        let table_id = table_with_empty_pages(&db, data_dir.path(), "t", 1)?;
        let pool = db.buffer_pool();
        let page_id = PageId::new(table_id, 0);
        let file = db.catalog().get_file(table_id)?;

        let tid = TransactionId::new();
        pool.insert_tuple(tid, table_id, int_tuple(7))?;
        pool.flush_page(page_id)?;
        pool.flush_page(page_id)?;
        assert_eq!(file.as_heap().read_page(page_id)?.iter().count(), 1);

        // discarding a flushed page reloads the disk version
        pool.discard_page(page_id);
        assert!(!pool.is_cached(page_id));
        let page = pool.get_page(tid, page_id, Permissions::ReadOnly)?;
        assert_eq!(page.read().unwrap().as_heap().iter().count(), 1);
        drop(page);

        pool.insert_tuple(tid, table_id, int_tuple(8))?;
        pool.flush_all_pages()?;
        assert_eq!(file.as_heap().read_page(page_id)?.iter().count(), 2);
        pool.transaction_complete(tid, true)?;
        Ok(())
    }
}
