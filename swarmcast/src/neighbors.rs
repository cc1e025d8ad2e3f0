//! Peers observed on the medium.

use hashbrown::HashSet;

use crate::types::NodeAddress;

/// Every address seen as the sender of a decoded packet.
///
/// Its size is the denominator of file popularity. Entries are never evicted.
#[derive(Debug, Clone, Default)]
pub struct NeighborSet {
    seen: HashSet<NodeAddress>,
}

impl NeighborSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a packet from `address`. Returns true on first sighting.
    pub fn record_seen(&mut self, address: NodeAddress) -> bool {
        self.seen.insert(address)
    }

    pub fn contains(&self, address: NodeAddress) -> bool {
        self.seen.contains(&address)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
