use std::collections::HashMap;

use crate::common::PageId;

/// UsageReplacer picks eviction victims for the buffer pool: the least frequently used page
/// among the pages the pool allows to be evicted.
#[derive(Default)]
pub(in crate::buffer) struct UsageReplacer {
    usage_counts: HashMap<PageId, u64>,
}

impl UsageReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The page was requested. Newly tracked pages start with a count of 1.
    pub fn record_access(&mut self, page_id: PageId) {
        *self.usage_counts.entry(page_id).or_insert(0) += 1;
    }

    /// The page left the buffer pool
    pub fn remove(&mut self, page_id: PageId) {
        self.usage_counts.remove(&page_id);
    }

    /// Returns the page with the smallest usage count for which `evictable` holds,
    /// or None if no page may be evicted. Ties are broken arbitrarily.
    pub fn pick_victim(&self, evictable: impl Fn(PageId) -> bool) -> Option<PageId> {
        self.usage_counts
            .iter()
            .filter(|(page_id, _)| evictable(**page_id))
            .min_by_key(|(_, count)| **count)
            .map(|(page_id, _)| *page_id)
    }

    #[cfg(test)]
    pub fn usage_count(&self, page_id: PageId) -> Option<u64> {
        self.usage_counts.get(&page_id).copied()
    }
}
