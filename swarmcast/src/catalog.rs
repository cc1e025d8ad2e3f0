//! The set of files a node knows about, and the policy for what to fetch
//! next.

use core::cmp::Ordering;

use hashbrown::HashMap;

use crate::file::FileRecord;
use crate::types::{FileId, NodeAddress};

/// All FileRecords owned by one node, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    records: HashMap<FileId, FileRecord>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find_by_id(&self, id: FileId) -> Option<&FileRecord> {
        self.records.get(&id)
    }

    pub fn find_by_id_mut(&mut self, id: FileId) -> Option<&mut FileRecord> {
        self.records.get_mut(&id)
    }

    /// Insert a file held in full at bootstrap.
    ///
    /// An existing record for the id is replaced by a full one.
    pub fn insert_full(&mut self, id: FileId, size_kb: u32) {
        let mut record = FileRecord::full(id, size_kb);
        if let Some(old) = self.records.remove(&id) {
            for holder in old.holders() {
                record.record_seen_at(holder);
            }
        }
        self.records.insert(id, record);
    }

    /// Record that `announcer` holds `id` in full, creating an empty record
    /// on first mention. Never marks chunks.
    ///
    /// Returns true if a new record was created.
    pub fn merge_discovered(&mut self, id: FileId, size_kb: u32, announcer: NodeAddress) -> bool {
        let mut created = false;
        let record = self.records.entry(id).or_insert_with(|| {
            created = true;
            FileRecord::empty(id, size_kb)
        });
        record.record_seen_at(announcer);
        created
    }

    /// Existing record for `id`, or a new empty one of `size_kb`.
    pub fn lookup_or_create(&mut self, id: FileId, size_kb: u32) -> &mut FileRecord {
        self.records
            .entry(id)
            .or_insert_with(|| FileRecord::empty(id, size_kb))
    }

    pub fn full_count(&self) -> usize {
        self.records.values().filter(|r| r.is_full()).count()
    }

    /// Files held in full, sorted by id.
    pub fn full_files(&self) -> Vec<&FileRecord> {
        let mut full: Vec<&FileRecord> = self.records.values().filter(|r| r.is_full()).collect();
        full.sort_unstable_by_key(|r| r.id());
        full
    }

    /// Iterate all records in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Choose which file to pull from `from`.
    ///
    /// Candidates are files not yet full that `from` is known to hold.
    /// Preference: fewest missing chunks, then least popular among
    /// `total_neighbors`, then lowest id. `None` when nothing qualifies.
    pub fn pick_file_to_request(&self, from: NodeAddress, total_neighbors: usize) -> Option<FileId> {
        self.records
            .values()
            .filter(|r| !r.is_full() && r.is_seen_at(from))
            .min_by(|a, b| compare_candidates(a, b, total_neighbors))
            .map(FileRecord::id)
    }
}

fn compare_candidates(a: &FileRecord, b: &FileRecord, total_neighbors: usize) -> Ordering {
    a.missing_count()
        .cmp(&b.missing_count())
        .then_with(|| {
            a.popularity(total_neighbors)
                .total_cmp(&b.popularity(total_neighbors))
        })
        .then_with(|| a.id().cmp(&b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(n: u32) -> NodeAddress {
        NodeAddress::new(n)
    }

    #[test]
    fn test_insert_full_and_find() {
        let mut catalog = FileCatalog::new();
        catalog.insert_full(4, 100);
        catalog.insert_full(2, 100);

        assert_eq!(catalog.len(), 2);
        assert!(catalog.find_by_id(4).is_some_and(FileRecord::is_full));
        assert!(catalog.find_by_id(5).is_none());
        assert_eq!(catalog.full_count(), 2);

        let ids: Vec<FileId> = catalog.full_files().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn test_merge_discovered_creates_empty_record() {
        let mut catalog = FileCatalog::new();
        assert!(catalog.merge_discovered(7, 1000, addr(1)));
        assert!(!catalog.merge_discovered(7, 1000, addr(2)));

        let record = catalog.find_by_id(7).expect("record");
        assert_eq!(record.received_count(), 0);
        assert_eq!(record.holder_count(), 2);
        assert_eq!(catalog.full_count(), 0);
    }

    #[test]
    fn test_merge_discovered_keeps_held_chunks() {
        let mut catalog = FileCatalog::new();
        catalog.insert_full(7, 10);
        catalog.merge_discovered(7, 10, addr(1));
        assert!(catalog.find_by_id(7).is_some_and(FileRecord::is_full));
    }

    #[test]
    fn test_lookup_or_create_returns_existing() {
        let mut catalog = FileCatalog::new();
        catalog.lookup_or_create(3, 10).mark_received(0);
        assert_eq!(catalog.lookup_or_create(3, 10).received_count(), 1);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_pick_prefers_fewest_missing() {
        let mut catalog = FileCatalog::new();
        catalog.merge_discovered(1, 100, addr(9));
        catalog.merge_discovered(2, 10, addr(9));
        assert_eq!(catalog.pick_file_to_request(addr(9), 1), Some(2));
    }

    #[test]
    fn test_pick_breaks_ties_by_popularity_then_id() {
        let mut catalog = FileCatalog::new();
        catalog.merge_discovered(1, 10, addr(9));
        catalog.merge_discovered(1, 10, addr(8));
        catalog.merge_discovered(2, 10, addr(9));
        catalog.merge_discovered(3, 10, addr(9));

        // 2 and 3 are equally rare; 1 is held by two neighbors.
        assert_eq!(catalog.pick_file_to_request(addr(9), 2), Some(2));
    }

    #[test]
    fn test_pick_skips_unseen_and_full() {
        let mut catalog = FileCatalog::new();
        catalog.insert_full(1, 10);
        catalog.merge_discovered(1, 10, addr(9));
        catalog.merge_discovered(2, 10, addr(8));

        assert_eq!(catalog.pick_file_to_request(addr(9), 2), None);
        assert_eq!(catalog.pick_file_to_request(addr(8), 2), Some(2));
    }

    proptest! {
        #[test]
        fn prop_pick_is_eligible(
            files in proptest::collection::vec((0u32..20, 1u32..50, 0u32..4), 0..40),
            from in 0u32..4,
        ) {
            let mut catalog = FileCatalog::new();
            for (id, size_kb, holder) in files {
                if holder == 0 {
                    catalog.insert_full(id, size_kb);
                } else {
                    catalog.merge_discovered(id, size_kb, addr(holder));
                }
            }
            if let Some(id) = catalog.pick_file_to_request(addr(from), 4) {
                let record = catalog.find_by_id(id).expect("picked record exists");
                prop_assert!(!record.is_full());
                prop_assert!(record.is_seen_at(addr(from)));
            }
        }
    }
}
