//! Metrics collection for simulation analysis.

use std::collections::{BTreeMap, BTreeSet};

use swarmcast::{FileId, NodeAddress, Timestamp};

/// Completion state of every node at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSnapshot {
    pub time: Timestamp,
    /// Files held in full, per node.
    pub full_files: BTreeMap<NodeAddress, usize>,
    /// Chunks held across all files, per node.
    pub chunks_held: BTreeMap<NodeAddress, u64>,
}

impl CompletionSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            full_files: BTreeMap::new(),
            chunks_held: BTreeMap::new(),
        }
    }

    pub fn record_node(&mut self, address: NodeAddress, full_files: usize, chunks_held: u64) {
        self.full_files.insert(address, full_files);
        self.chunks_held.insert(address, chunks_held);
    }

    /// Whether every node holds `catalog_len` files in full.
    pub fn all_complete(&self, catalog_len: usize) -> bool {
        self.full_files.values().all(|&count| count >= catalog_len)
    }

    pub fn complete_nodes(&self, catalog_len: usize) -> usize {
        self.full_files
            .values()
            .filter(|&&count| count >= catalog_len)
            .count()
    }

    pub fn min_full_files(&self) -> usize {
        self.full_files.values().copied().min().unwrap_or(0)
    }

    pub fn mean_full_files(&self) -> f64 {
        if self.full_files.is_empty() {
            return 0.0;
        }
        self.full_files.values().sum::<usize>() as f64 / self.full_files.len() as f64
    }
}

/// Per-kind message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub advertisements: u64,
    pub requests: u64,
    pub replies: u64,
    /// Frames whose type byte was not recognised.
    pub unknown: u64,
}

impl KindCounts {
    pub fn total(&self) -> u64 {
        self.advertisements + self.requests + self.replies + self.unknown
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Broadcasts put on the medium.
    pub messages_sent: u64,
    /// Per-receiver copies lost to link loss.
    pub messages_dropped: u64,
    /// Per-receiver copies handed to a node.
    pub messages_delivered: u64,
    pub sent_by_kind: KindCounts,
    pub bytes_sent: u64,
    /// Every (node, file) completion, in order.
    pub file_completions: Vec<(Timestamp, NodeAddress, FileId)>,
    /// Time at which the last node completed each catalog file.
    pub full_replication: BTreeMap<FileId, Timestamp>,
    /// Nodes that stopped on a protocol violation.
    pub halted: BTreeSet<NodeAddress>,
    pub snapshots: Vec<CompletionSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: CompletionSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn latest_snapshot(&self) -> Option<&CompletionSnapshot> {
        self.snapshots.last()
    }

    /// First snapshot in which every node holds every catalog file.
    pub fn convergence_time(&self, catalog_len: usize) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.all_complete(catalog_len))
            .map(|s| s.time)
    }

    /// Time by which every catalog file reached every node, if all did.
    pub fn full_replication_time(&self, catalog_len: usize) -> Option<Timestamp> {
        if self.full_replication.len() < catalog_len {
            return None;
        }
        self.full_replication.values().copied().max()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Distinct files present anywhere at bootstrap.
    pub catalog_len: usize,
    pub node_count: usize,
    /// Whether the run ended because no events were left.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Every node holds every catalog file at the end of the run.
    pub fn converged(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.all_complete(self.catalog_len))
    }

    pub fn final_complete_nodes(&self) -> usize {
        self.metrics
            .latest_snapshot()
            .map(|s| s.complete_nodes(self.catalog_len))
            .unwrap_or(0)
    }

    pub fn halted_count(&self) -> usize {
        self.metrics.halted.len()
    }
}
