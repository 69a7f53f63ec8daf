use std::fmt::Display;

pub type TableId = u32;
pub type PageNo = u32;
pub type SlotNo = u32;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_POOL_SIZE: usize = 50;

/// Identifies a page of a table. Unique across the whole database.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageId {
    table_id: TableId,
    page_no: PageNo,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: PageNo) -> Self {
        Self { table_id, page_no }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// Location of a tuple: the page it lives on and its slot within that page.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordId {
    page_id: PageId,
    slot: SlotNo,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: SlotNo) -> Self {
        Self { page_id, slot }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn slot(&self) -> SlotNo {
        self.slot
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}
