//! Event types and priority queue ordering for discrete event simulation.

use std::cmp::Ordering;
use std::rc::Rc;

use swarmcast::{NodeAddress, TimerSlot, Timestamp};

/// Unique sequence number for deterministic ordering of same-time events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Topology changes and bookkeeping that can be scheduled mid-run.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioAction {
    /// Split the network into isolated groups.
    Partition { groups: Vec<Vec<NodeAddress>> },
    /// Re-enable every link.
    HealPartition,
    DisableLink { from: NodeAddress, to: NodeAddress },
    EnableLink { from: NodeAddress, to: NodeAddress },
    SetLossRate {
        from: NodeAddress,
        to: NodeAddress,
        rate: f64,
    },
    SetGlobalLossRate { rate: f64 },
    TakeSnapshot,
}

#[derive(Debug, Clone)]
pub enum Event {
    /// One receiver's copy of a broadcast. Copies share the frame.
    MessageDelivery {
        to: NodeAddress,
        from: NodeAddress,
        data: Rc<[u8]>,
    },
    /// Expiry of the callback a node armed under `handle`.
    TimerFire {
        node: NodeAddress,
        slot: TimerSlot,
        handle: u64,
    },
    ScenarioAction(ScenarioAction),
}

/// An event with its due time and tie-breaking sequence number.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    pub seq: SequenceNumber,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    // Reversed so BinaryHeap pops the earliest (time, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
