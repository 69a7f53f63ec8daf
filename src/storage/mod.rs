use std::sync::{Arc, RwLock};

use anyhow::Result;

use self::heap::file::HeapFile;
use self::heap::page::HeapPage;
use crate::buffer::buffer_pool::BufferPool;
use crate::common::{PageId, RecordId, TableId};
use crate::concurrency::TransactionId;
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

pub mod heap;

/// A page cached by the buffer pool. Callers must hold the matching page lock
/// and must not keep the reference beyond their transaction.
pub type PageRef = Arc<RwLock<Page>>;

/// Access a transaction requests when fetching a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// All kinds of pages the buffer pool can cache.
#[derive(Debug)]
pub enum Page {
    Heap(HeapPage),
}

impl Page {
    pub fn id(&self) -> PageId {
        match self {
            Page::Heap(page) => page.page_id(),
        }
    }

    pub fn dirtier(&self) -> Option<TransactionId> {
        match self {
            Page::Heap(page) => page.dirtier(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtier().is_some()
    }

    pub fn mark_dirty(&mut self, dirtier: Option<TransactionId>) {
        match self {
            Page::Heap(page) => page.mark_dirty(dirtier),
        }
    }

    pub fn page_data(&self) -> Vec<u8> {
        match self {
            Page::Heap(page) => page.page_data(),
        }
    }

    pub fn as_heap(&self) -> &HeapPage {
        match self {
            Page::Heap(page) => page,
        }
    }

    pub fn as_heap_mut(&mut self) -> &mut HeapPage {
        match self {
            Page::Heap(page) => page,
        }
    }
}

/// All kinds of files backing a table.
#[derive(Debug)]
pub enum DbFile {
    Heap(HeapFile),
}

impl DbFile {
    pub fn table_id(&self) -> TableId {
        match self {
            DbFile::Heap(file) => file.table_id(),
        }
    }

    pub fn schema(&self) -> &Schema {
        match self {
            DbFile::Heap(file) => file.schema(),
        }
    }

    pub fn read_page(&self, page_id: PageId) -> Result<Page> {
        match self {
            DbFile::Heap(file) => Ok(Page::Heap(file.read_page(page_id)?)),
        }
    }

    pub fn write_page(&self, page: &Page) -> Result<()> {
        match (self, page) {
            (DbFile::Heap(file), Page::Heap(page)) => file.write_page(page),
        }
    }

    pub fn insert_tuple(
        &self,
        buffer_pool: &BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<(RecordId, Vec<PageRef>)> {
        match self {
            DbFile::Heap(file) => file.insert_tuple(buffer_pool, tid, tuple),
        }
    }

    pub fn delete_tuple(
        &self,
        buffer_pool: &BufferPool,
        tid: TransactionId,
        record_id: RecordId,
    ) -> Result<Vec<PageRef>> {
        match self {
            DbFile::Heap(file) => file.delete_tuple(buffer_pool, tid, record_id),
        }
    }

    pub fn as_heap(&self) -> &HeapFile {
        match self {
            DbFile::Heap(file) => file,
        }
    }
}
