use std::sync::Arc;

use anyhow::{Error, Result};

use crate::common::{PageId, RecordId, SlotNo};
use crate::concurrency::TransactionId;
use crate::error::DbError;
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

/// A page of a heap file.
///
/// On disk a page is a bitmap with one bit per slot (most significant bit first),
/// followed by the slots. Each slot holds exactly one tuple of the table's schema.
/// Bytes of unused slots and the bytes after the last slot are zero.
#[derive(Debug)]
pub struct HeapPage {
    page_id: PageId,
    schema: Arc<Schema>,
    page_size: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtier: Option<TransactionId>,
}

impl HeapPage {
    /// Parses a page from its on-disk representation. The page size is the length of `data`.
    pub fn new(page_id: PageId, data: &[u8], schema: Arc<Schema>) -> Result<Self> {
        let page_size = data.len();
        let tuple_size = schema.tuple_size();
        let num_slots = Self::num_slots(page_size, tuple_size);
        Self::check_slot_count(num_slots)?;
        let header_size = Self::header_size(num_slots);

        let header = data[..header_size].to_vec();
        let mut page = Self {
            page_id,
            schema,
            page_size,
            header,
            tuples: Vec::with_capacity(num_slots),
            dirtier: None,
        };

        for slot in 0..num_slots {
            if page.is_slot_used(slot) {
                let start = header_size + slot * tuple_size;
                let mut tuple = Tuple::parse(&data[start..start + tuple_size], &page.schema);
                tuple.set_record_id(Some(RecordId::new(page_id, slot as SlotNo)));
                page.tuples.push(Some(tuple));
            } else {
                page.tuples.push(None);
            }
        }

        Ok(page)
    }

    /// Number of tuples fitting on a page: every tuple needs its bytes plus one header bit.
    pub fn num_slots(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    /// Fails if the highest slot number of a page does not fit into a `SlotNo`.
    pub fn check_slot_count(num_slots: usize) -> Result<()> {
        let highest_slot = num_slots.saturating_sub(1);
        if SlotNo::try_from(highest_slot).is_err() {
            return Err(Error::msg(format!(
                "A page with {num_slots} slots exceeds the largest slot number {}",
                SlotNo::MAX
            )));
        }
        Ok(())
    }

    pub fn header_size(num_slots: usize) -> usize {
        (num_slots + 7) / 8
    }

    /// Data of a page without any tuples.
    pub fn create_empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Serializes the page. `HeapPage::new` on the result yields the same tuples.
    pub fn page_data(&self) -> Vec<u8> {
        let tuple_size = self.schema.tuple_size();
        let header_size = self.header.len();

        let mut data = Self::create_empty_page_data(self.page_size);
        data[..header_size].copy_from_slice(&self.header);
        for (slot, tuple) in self.tuples.iter().enumerate() {
            if let Some(tuple) = tuple {
                let start = header_size + slot * tuple_size;
                tuple.serialize(&mut data[start..start + tuple_size]);
            }
        }
        data
    }

    pub fn num_slots_total(&self) -> usize {
        self.tuples.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.tuples.len())
            .filter(|slot| !self.is_slot_used(*slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        let byte = self.header[slot / 8];
        byte & (0x80 >> (slot % 8)) != 0
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 0x80 >> (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }

    /// Stores the tuple in the lowest free slot and marks the page dirty.
    /// Fails with `PageFull` if there is no free slot.
    pub fn insert_tuple(&mut self, tid: TransactionId, mut tuple: Tuple) -> Result<RecordId> {
        tuple.check_schema(&self.schema)?;
        let slot = (0..self.tuples.len())
            .find(|slot| !self.is_slot_used(*slot))
            .ok_or(DbError::PageFull(self.page_id))?;

        // slot numbers fit, the slot count was checked when the page was created
        let record_id = RecordId::new(self.page_id, slot as SlotNo);
        tuple.set_record_id(Some(record_id));
        self.mark_slot_used(slot, true);
        self.tuples[slot] = Some(tuple);
        self.mark_dirty(Some(tid));

        Ok(record_id)
    }

    /// Frees the slot of the record and marks the page dirty. Returns the removed tuple.
    pub fn delete_tuple(&mut self, tid: TransactionId, record_id: RecordId) -> Result<Tuple> {
        if record_id.page_id() != self.page_id {
            return Err(DbError::InvalidReference(format!(
                "tuple {record_id} is not on page {}",
                self.page_id
            ))
            .into());
        }
        let slot = record_id.slot() as usize;
        if slot >= self.tuples.len() || !self.is_slot_used(slot) {
            return Err(DbError::InvalidReference(format!("slot {record_id} is not occupied")).into());
        }

        self.mark_slot_used(slot, false);
        let mut tuple = self.tuples[slot].take().ok_or_else(|| {
            DbError::InvalidReference(format!("slot {record_id} holds no tuple"))
        })?;
        tuple.set_record_id(None);
        self.mark_dirty(Some(tid));

        Ok(tuple)
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.tuples.get(slot).and_then(|tuple| tuple.as_ref())
    }

    /// Iterates over the stored tuples in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    pub fn mark_dirty(&mut self, dirtier: Option<TransactionId>) {
        self.dirtier = dirtier;
    }

    /// The transaction which dirtied the page last, None if the page is clean.
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }
}
