//! Per-file chunk bookkeeping.

use hashbrown::HashSet;

use crate::types::{FileId, NodeAddress, BYTES_PER_KB, CHUNK_SIZE};

const WORD_BITS: u32 = u64::BITS;

/// A file known to this node: which chunks are held, and which neighbors are
/// known to hold all of it.
///
/// The bitmap length is fixed at construction from the file size. Records are
/// never evicted, and chunks are never unmarked.
#[derive(Debug, Clone)]
pub struct FileRecord {
    id: FileId,
    size_kb: u32,
    chunk_count: u32,
    last_chunk_size: u16,
    /// Bit i of word i / 64 set means chunk i is held.
    chunks: Vec<u64>,
    received_count: u32,
    seen_at: HashSet<NodeAddress>,
}

/// Number of chunks a file of `size_kb` kilobytes splits into.
pub fn chunk_count_for(size_kb: u32) -> u32 {
    let bytes = u64::from(size_kb) * BYTES_PER_KB;
    bytes.div_ceil(u64::from(CHUNK_SIZE)) as u32
}

/// Length of the final chunk of a file of `size_kb` kilobytes: the byte
/// length modulo `CHUNK_SIZE`.
///
/// An exact multiple of `CHUNK_SIZE` yields zero, so its last chunk carries
/// an empty body on the wire.
pub fn last_chunk_size_for(size_kb: u32) -> u16 {
    let bytes = u64::from(size_kb) * BYTES_PER_KB;
    (bytes % u64::from(CHUNK_SIZE)) as u16
}

impl FileRecord {
    /// Record with no chunks held.
    pub fn empty(id: FileId, size_kb: u32) -> Self {
        let chunk_count = chunk_count_for(size_kb);
        let words = chunk_count.div_ceil(WORD_BITS) as usize;
        Self {
            id,
            size_kb,
            chunk_count,
            last_chunk_size: last_chunk_size_for(size_kb),
            chunks: vec![0; words],
            received_count: 0,
            seen_at: HashSet::new(),
        }
    }

    /// Record with every chunk held.
    pub fn full(id: FileId, size_kb: u32) -> Self {
        let mut record = Self::empty(id, size_kb);
        for (i, word) in record.chunks.iter_mut().enumerate() {
            let start = i as u32 * WORD_BITS;
            let bits = (record.chunk_count - start).min(WORD_BITS);
            *word = if bits == WORD_BITS {
                u64::MAX
            } else {
                (1u64 << bits) - 1
            };
        }
        record.received_count = record.chunk_count;
        record
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn size_kb(&self) -> u32 {
        self.size_kb
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn last_chunk_size(&self) -> u16 {
        self.last_chunk_size
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.received_count == self.chunk_count
    }

    #[inline]
    pub fn missing_count(&self) -> u32 {
        self.chunk_count - self.received_count
    }

    pub fn has_chunk(&self, chunk_id: u32) -> bool {
        if chunk_id >= self.chunk_count {
            return false;
        }
        let (word, bit) = Self::locate(chunk_id);
        self.chunks[word] & bit != 0
    }

    /// Lowest chunk not yet held, or `chunk_count` when the file is full.
    pub fn first_missing_chunk(&self) -> u32 {
        for (i, word) in self.chunks.iter().enumerate() {
            if *word != u64::MAX {
                let idx = i as u32 * WORD_BITS + (!word).trailing_zeros();
                // Padding bits past chunk_count are always clear.
                return idx.min(self.chunk_count);
            }
        }
        self.chunk_count
    }

    /// Lowest chunk not yet held.
    pub fn next_missing(&self) -> Option<u32> {
        let idx = self.first_missing_chunk();
        (idx < self.chunk_count).then_some(idx)
    }

    /// Wire length of `chunk_id`: `CHUNK_SIZE` except for the last chunk.
    pub fn chunk_size(&self, chunk_id: u32) -> u16 {
        if self.chunk_count > 0 && chunk_id == self.chunk_count - 1 {
            self.last_chunk_size
        } else {
            CHUNK_SIZE as u16
        }
    }

    /// Mark a chunk as held. Returns true if it was not held before.
    ///
    /// Out-of-range ids are ignored.
    pub fn mark_received(&mut self, chunk_id: u32) -> bool {
        if chunk_id >= self.chunk_count {
            return false;
        }
        let (word, bit) = Self::locate(chunk_id);
        if self.chunks[word] & bit != 0 {
            return false;
        }
        self.chunks[word] |= bit;
        self.received_count += 1;
        debug_assert!(self.received_count <= self.chunk_count);
        true
    }

    /// Record a neighbor as holding this file in full. Returns true if new.
    pub fn record_seen_at(&mut self, address: NodeAddress) -> bool {
        self.seen_at.insert(address)
    }

    pub fn is_seen_at(&self, address: NodeAddress) -> bool {
        self.seen_at.contains(&address)
    }

    pub fn holder_count(&self) -> usize {
        self.seen_at.len()
    }

    pub fn holders(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        self.seen_at.iter().copied()
    }

    /// Fraction of `total_neighbors` known to hold this file. Zero when no
    /// neighbors are known.
    pub fn popularity(&self, total_neighbors: usize) -> f64 {
        if total_neighbors == 0 {
            return 0.0;
        }
        self.seen_at.len() as f64 / total_neighbors as f64
    }

    /// Population count of the bitmap.
    pub fn count_held(&self) -> u32 {
        self.chunks.iter().map(|w| w.count_ones()).sum()
    }

    #[inline]
    fn locate(chunk_id: u32) -> (usize, u64) {
        (
            (chunk_id / WORD_BITS) as usize,
            1u64 << (chunk_id % WORD_BITS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chunk_geometry_for_1000kb() {
        let record = FileRecord::empty(1, 1000);
        assert_eq!(record.chunk_count(), 690);
        assert_eq!(record.last_chunk_size(), 950);
        assert_eq!(record.chunk_size(0), 1450);
        assert_eq!(record.chunk_size(688), 1450);
        assert_eq!(record.chunk_size(689), 950);
    }

    #[test]
    fn test_exact_multiple_has_zero_length_last_chunk() {
        // 29 KB = 29000 bytes = 20 * 1450
        let record = FileRecord::empty(1, 29);
        assert_eq!(record.chunk_count(), 20);
        assert_eq!(record.last_chunk_size(), 0);
        assert_eq!(record.chunk_size(18), 1450);
        assert_eq!(record.chunk_size(19), 0);
        assert_eq!(last_chunk_size_for(58), 0);
    }

    #[test]
    fn test_empty_file_is_full() {
        let record = FileRecord::empty(3, 0);
        assert_eq!(record.chunk_count(), 0);
        assert!(record.is_full());
        assert_eq!(record.first_missing_chunk(), 0);
        assert_eq!(record.next_missing(), None);
    }

    #[test]
    fn test_full_record_has_every_chunk() {
        let record = FileRecord::full(9, 1000);
        assert!(record.is_full());
        assert_eq!(record.missing_count(), 0);
        assert_eq!(record.count_held(), 690);
        assert!(record.has_chunk(0));
        assert!(record.has_chunk(689));
        assert!(!record.has_chunk(690));
        assert_eq!(record.first_missing_chunk(), 690);
    }

    #[test]
    fn test_mark_received_is_idempotent() {
        let mut record = FileRecord::empty(1, 10);
        assert!(record.mark_received(3));
        assert!(!record.mark_received(3));
        assert_eq!(record.received_count(), 1);
        assert_eq!(record.first_missing_chunk(), 0);
    }

    #[test]
    fn test_mark_received_out_of_range_ignored() {
        let mut record = FileRecord::empty(1, 10);
        let count = record.chunk_count();
        assert!(!record.mark_received(count));
        assert!(!record.mark_received(u32::MAX));
        assert_eq!(record.received_count(), 0);
    }

    #[test]
    fn test_first_missing_crosses_word_boundary() {
        let mut record = FileRecord::empty(1, 1000);
        for chunk in 0..70 {
            record.mark_received(chunk);
        }
        assert_eq!(record.first_missing_chunk(), 70);
        assert_eq!(record.next_missing(), Some(70));
    }

    #[test]
    fn test_filling_every_chunk_makes_full() {
        let mut record = FileRecord::empty(1, 100);
        for chunk in 0..record.chunk_count() {
            assert!(!record.is_full());
            record.mark_received(chunk);
        }
        assert!(record.is_full());
        assert_eq!(record.next_missing(), None);
    }

    #[test]
    fn test_popularity() {
        let mut record = FileRecord::empty(1, 10);
        assert_eq!(record.popularity(0), 0.0);
        assert_eq!(record.popularity(4), 0.0);

        assert!(record.record_seen_at(NodeAddress::new(1)));
        assert!(!record.record_seen_at(NodeAddress::new(1)));
        record.record_seen_at(NodeAddress::new(2));
        assert_eq!(record.popularity(4), 0.5);
        assert_eq!(record.holder_count(), 2);
        assert!(record.is_seen_at(NodeAddress::new(2)));
    }

    proptest! {
        #[test]
        fn prop_received_count_matches_bitmap(
            size_kb in 0u32..200,
            marks in proptest::collection::vec(0u32..200, 0..300),
        ) {
            let mut record = FileRecord::empty(1, size_kb);
            for chunk in marks {
                let was_held = record.has_chunk(chunk);
                let newly = record.mark_received(chunk);
                prop_assert_eq!(newly, !was_held && chunk < record.chunk_count());
                prop_assert_eq!(record.received_count(), record.count_held());
                prop_assert!(record.received_count() <= record.chunk_count());
            }
            prop_assert_eq!(record.is_full(), record.received_count() == record.chunk_count());
        }

        #[test]
        fn prop_fullness_is_monotonic(marks in proptest::collection::vec(0u32..30, 0..100)) {
            let mut record = FileRecord::empty(1, 20);
            let mut was_full = record.is_full();
            for chunk in marks {
                record.mark_received(chunk);
                prop_assert!(!was_full || record.is_full());
                was_full = record.is_full();
            }
        }
    }
}
