use std::fs::{File, OpenOptions};
use std::os::unix::prelude::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Error, Result};
use log::debug;

use super::page::HeapPage;
use crate::buffer::buffer_pool::BufferPool;
use crate::common::{PageId, PageNo, RecordId, TableId};
use crate::concurrency::TransactionId;
use crate::error::DbError;
use crate::storage::{PageRef, Permissions};
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

/// Iterates over all tuples of a heap file. Pages are fetched through the buffer pool
/// with read-only permission, so the transaction ends up holding a shared lock on every page.
pub struct HeapTupleIterator<'a> {
    curr_page_no: PageNo,
    num_pages: PageNo,
    curr_slot: usize,
    file: &'a HeapFile,
    buffer_pool: &'a BufferPool,
    tid: TransactionId,
}

impl<'a> HeapTupleIterator<'a> {
    fn new(
        num_pages: PageNo,
        file: &'a HeapFile,
        buffer_pool: &'a BufferPool,
        tid: TransactionId,
    ) -> Self {
        Self {
            curr_page_no: 0,
            num_pages,
            curr_slot: 0,
            file,
            buffer_pool,
            tid,
        }
    }

    fn fetch_next_tuple(&mut self) -> Result<Option<Tuple>> {
        loop {
            if self.curr_page_no >= self.num_pages {
                return Ok(None);
            }
            let page_id = PageId::new(self.file.table_id, self.curr_page_no);
            let page = self
                .buffer_pool
                .get_page(self.tid, page_id, Permissions::ReadOnly)?;
            let page = page.read().unwrap();
            let heap_page = page.as_heap();

            let next = (self.curr_slot..heap_page.num_slots_total())
                .find_map(|slot| heap_page.tuple(slot).map(|tuple| (slot, tuple)));
            match next {
                Some((slot, tuple)) => {
                    self.curr_slot = slot + 1;
                    return Ok(Some(tuple.clone()));
                }
                None => {
                    self.curr_page_no += 1;
                    self.curr_slot = 0;
                }
            }
        }
    }
}

impl<'a> std::iter::Iterator for HeapTupleIterator<'a> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetch_next_tuple().transpose()
    }
}

/// An unordered collection of tuples stored in a single file.
/// The file is a sequence of fixed-size pages, page `i` starts at byte `i * page_size`.
///
/// No file handle is kept open; every read and write opens the file on its own.
#[derive(Debug)]
pub struct HeapFile {
    table_id: TableId,
    path: PathBuf,
    schema: Arc<Schema>,
    page_size: usize,
    /// serializes page allocations
    append_lock: Mutex<()>,
}

impl HeapFile {
    /// Opens the heap file at `path`, creating an empty file if it does not exist yet.
    pub fn open(
        table_id: TableId,
        path: impl Into<PathBuf>,
        schema: Schema,
        page_size: usize,
    ) -> Result<Self> {
        let path = path.into();
        let num_slots = HeapPage::num_slots(page_size, schema.tuple_size());
        if num_slots == 0 {
            return Err(Error::msg(format!(
                "Tuples of schema ({schema}) do not fit on a page of {page_size} bytes"
            )));
        }
        HeapPage::check_slot_count(num_slots)?;

        OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)
            .map_err(DbError::Io)
            .with_context(|| format!("Could not open data file {}", path.display()))?;

        Ok(Self {
            table_id,
            path,
            schema: Arc::new(schema),
            page_size,
            append_lock: Mutex::new(()),
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn file_len(&self) -> Result<u64> {
        let metadata = std::fs::metadata(&self.path)
            .map_err(DbError::Io)
            .with_context(|| format!("Could not read size of {}", self.path.display()))?;
        Ok(metadata.len())
    }

    /// Returns the number of pages, a trailing partial page counts as a page.
    pub fn num_pages(&self) -> Result<PageNo> {
        let len = self.file_len()?;
        Ok(len.div_ceil(self.page_size as u64) as PageNo)
    }

    /// Reads a page from disk. Fails if the page lies beyond the end of the file.
    pub fn read_page(&self, page_id: PageId) -> Result<HeapPage> {
        if page_id.table_id() != self.table_id {
            return Err(DbError::InvalidReference(format!(
                "page {page_id} does not belong to table {}",
                self.table_id
            ))
            .into());
        }

        let file = File::open(&self.path)
            .map_err(DbError::Io)
            .with_context(|| format!("Could not open data file {}", self.path.display()))?;
        let len = file
            .metadata()
            .map_err(DbError::Io)
            .with_context(|| format!("Could not read size of {}", self.path.display()))?
            .len();

        let num_pages = len.div_ceil(self.page_size as u64);
        if page_id.page_no() as u64 >= num_pages {
            return Err(DbError::InvalidReference(format!(
                "attempted to read page {page_id}, but table has only {num_pages} pages"
            ))
            .into());
        }

        let offset = page_id.page_no() as u64 * self.page_size as u64;
        let available = (len - offset).min(self.page_size as u64) as usize;
        let mut data = HeapPage::create_empty_page_data(self.page_size);
        file.read_exact_at(&mut data[..available], offset)
            .map_err(DbError::Io)
            .with_context(|| {
                format!(
                    "Could not read page at offset {} for table {}",
                    offset, self.table_id
                )
            })?;

        HeapPage::new(page_id, &data, Arc::clone(&self.schema))
    }

    /// Writes the page at its position in the file.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let offset = page.page_id().page_no() as u64 * self.page_size as u64;
        self.write_at(offset, &page.page_data())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(DbError::Io)
            .with_context(|| format!("Could not open data file {}", self.path.display()))?;
        file.write_all_at(data, offset)
            .map_err(DbError::Io)
            .with_context(|| {
                format!(
                    "Failed to write data at offset {} for table {}",
                    offset, self.table_id
                )
            })?;
        file.sync_all().map_err(DbError::Io).with_context(|| {
            format!(
                "Failed to sync data when writing at offset {} for table {}",
                offset, self.table_id
            )
        })?;

        Ok(())
    }

    /// Appends an empty page to the file and returns its page number.
    fn allocate_new_page(&self) -> Result<PageNo> {
        let _guard = self.append_lock.lock().unwrap();
        let page_no = self.num_pages()?;
        let offset = page_no as u64 * self.page_size as u64;
        self.write_at(offset, &HeapPage::create_empty_page_data(self.page_size))?;
        debug!("Allocated page {} of table {}", page_no, self.table_id);
        Ok(page_no)
    }

    /// Inserts the tuple into the first page with a free slot, appending a new page if all pages are full.
    /// Every page is requested with read-write permission. Returns the location of the tuple and the dirtied pages.
    pub fn insert_tuple(
        &self,
        buffer_pool: &BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<(RecordId, Vec<PageRef>)> {
        tuple.check_schema(&self.schema)?;

        let num_pages = self.num_pages()?;
        for page_no in 0..num_pages {
            let page_id = PageId::new(self.table_id, page_no);
            let page = buffer_pool.get_page(tid, page_id, Permissions::ReadWrite)?;
            let mut guard = page.write().unwrap();
            let heap_page = guard.as_heap_mut();
            if heap_page.num_empty_slots() > 0 {
                let record_id = heap_page.insert_tuple(tid, tuple)?;
                drop(guard);
                return Ok((record_id, vec![page]));
            }
        }

        // Somebody else might fill a freshly allocated page before we get its lock.
        loop {
            let page_no = self.allocate_new_page()?;
            let page_id = PageId::new(self.table_id, page_no);
            let page = buffer_pool.get_page(tid, page_id, Permissions::ReadWrite)?;
            let mut guard = page.write().unwrap();
            let heap_page = guard.as_heap_mut();
            if heap_page.num_empty_slots() > 0 {
                let record_id = heap_page.insert_tuple(tid, tuple)?;
                drop(guard);
                return Ok((record_id, vec![page]));
            }
        }
    }

    /// Removes the tuple stored at `record_id`. Returns the dirtied pages.
    pub fn delete_tuple(
        &self,
        buffer_pool: &BufferPool,
        tid: TransactionId,
        record_id: RecordId,
    ) -> Result<Vec<PageRef>> {
        let page_id = record_id.page_id();
        if page_id.table_id() != self.table_id {
            return Err(DbError::InvalidReference(format!(
                "tuple {record_id} is not stored in table {}",
                self.table_id
            ))
            .into());
        }

        let page = buffer_pool.get_page(tid, page_id, Permissions::ReadWrite)?;
        page.write()
            .unwrap()
            .as_heap_mut()
            .delete_tuple(tid, record_id)?;
        Ok(vec![page])
    }

    pub fn iter<'a>(
        &'a self,
        buffer_pool: &'a BufferPool,
        tid: TransactionId,
    ) -> Result<HeapTupleIterator<'a>> {
        let num_pages = self.num_pages()?;
        Ok(HeapTupleIterator::new(num_pages, self, buffer_pool, tid))
    }
}
