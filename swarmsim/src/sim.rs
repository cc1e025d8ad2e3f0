//! Discrete event simulator for swarmcast networks.

use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::rc::Rc;

use hashbrown::HashSet;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use swarmcast::types::{PACKET_ADVERTISEMENT, PACKET_REPLY, PACKET_REQUEST};
use swarmcast::wire::peek_type;
use swarmcast::{Duration, Event as NodeEvent, FileId, NodeAddress, TimerSlot, Timestamp};
use tracing::{debug, info, trace, warn};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{CompletionSnapshot, SimMetrics, SimulationResult};
use crate::node::{SimNode, TimerCommand};
use crate::topology::Topology;

/// Discrete event simulator.
///
/// Nodes never see each other directly: every broadcast is routed through
/// the [`Topology`] and every timer goes through the event queue.
pub struct Simulator {
    nodes: BTreeMap<NodeAddress, SimNode>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    /// Armed, not yet cancelled timer handles.
    live_timers: HashSet<(NodeAddress, u64)>,
    metrics: SimMetrics,
    next_seq: u64,
    /// Drives link loss.
    rng: ChaCha8Rng,
    /// Medium bitrate for airtime; `None` means frames take no airtime.
    bitrate_bps: Option<u64>,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
    timer_fire_count: u64,
}

impl Simulator {
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: BTreeMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            live_timers: HashSet::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            bitrate_bps: None,
            snapshot_interval: None,
            next_snapshot: None,
            timer_fire_count: 0,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Add transmission time at `bitrate_bps` to every delivery.
    pub fn with_bitrate(mut self, bitrate_bps: u64) -> Self {
        self.bitrate_bps = (bitrate_bps > 0).then_some(bitrate_bps);
        self
    }

    /// Record a completion snapshot every `interval`.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add a node holding `files` and start it at the current time.
    pub fn add_node(&mut self, address: NodeAddress, seed: u64, files: &[(FileId, u32)]) {
        let mut node = SimNode::new(address, seed, self.current_time);
        node.set_initial_files(files);
        node.start(self.current_time);
        self.nodes.insert(address, node);
        self.after_handler(address);
    }

    pub fn node(&self, address: NodeAddress) -> Option<&SimNode> {
        self.nodes.get(&address)
    }

    pub fn node_mut(&mut self, address: NodeAddress) -> Option<&mut SimNode> {
        self.nodes.get_mut(&address)
    }

    /// Node addresses in ascending order.
    pub fn node_addresses(&self) -> Vec<NodeAddress> {
        self.nodes.keys().copied().collect()
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn timer_fire_count(&self) -> u64 {
        self.timer_fire_count
    }

    /// Files held in full by at least one node at bootstrap.
    pub fn initial_catalog(&self) -> BTreeSet<FileId> {
        self.nodes
            .values()
            .flat_map(|node| node.initial_files().iter().map(|&(id, _)| id))
            .collect()
    }

    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Run until `end_time` or until the queue drains.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        self.run_while(end_time, |_| true)
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time.saturating_add(duration))
    }

    /// Run until every node holds every initially present file, or
    /// `deadline` passes.
    pub fn run_until_converged(&mut self, deadline: Timestamp) -> SimulationResult {
        let catalog: Vec<FileId> = self.initial_catalog().into_iter().collect();
        self.run_while(deadline, |sim| !sim.all_hold(&catalog))
    }

    fn run_while(
        &mut self,
        end_time: Timestamp,
        mut keep_going: impl FnMut(&Self) -> bool,
    ) -> SimulationResult {
        self.note_replicated_files();
        while keep_going(self) {
            let Some(next) = self.event_queue.peek() else {
                break;
            };
            if next.time > end_time {
                break;
            }
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        // Stopping early on the predicate leaves the clock where it was.
        if keep_going(self) {
            self.advance_time(end_time);
        }
        self.take_snapshot();

        let catalog_len = self.initial_catalog().len();
        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            catalog_len,
            node_count: self.nodes.len(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    /// Record files every node already holds, such as ones all nodes
    /// started with.
    fn note_replicated_files(&mut self) {
        let now = self.current_time;
        for file_id in self.initial_catalog() {
            if !self.metrics.full_replication.contains_key(&file_id)
                && self.nodes.values().all(|n| n.holds_in_full(file_id))
            {
                self.metrics.full_replication.insert(file_id, now);
            }
        }
    }

    fn all_hold(&self, catalog: &[FileId]) -> bool {
        self.nodes
            .values()
            .all(|node| catalog.iter().all(|&id| node.holds_in_full(id)))
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::MessageDelivery { to, from, data } => self.deliver_message(to, from, &data),
            Event::TimerFire { node, slot, handle } => self.fire_timer(node, slot, handle),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn deliver_message(&mut self, to: NodeAddress, from: NodeAddress, data: &[u8]) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&to) else {
            return;
        };
        self.metrics.messages_delivered += 1;
        if let Err(err) = node.handle_packet(data, from, now) {
            warn!(node = %to, %from, error = %err, "node halted");
            self.metrics.halted.insert(to);
        }
        self.after_handler(to);
    }

    fn fire_timer(&mut self, address: NodeAddress, slot: TimerSlot, handle: u64) {
        if !self.live_timers.remove(&(address, handle)) {
            trace!(node = %address, ?slot, handle, "cancelled timer skipped");
            return;
        }
        self.timer_fire_count += 1;
        let now = self.current_time;
        if let Some(node) = self.nodes.get_mut(&address) {
            node.handle_timer(slot, now);
        }
        self.after_handler(address);
    }

    /// Apply timer commands, route broadcasts and record events produced by
    /// the last handler `address` ran.
    fn after_handler(&mut self, address: NodeAddress) {
        let Some(node) = self.nodes.get_mut(&address) else {
            return;
        };
        let commands = node.take_timer_commands();
        let outgoing = node.take_outgoing();
        let events = node.take_events();

        for command in commands {
            match command {
                TimerCommand::Schedule {
                    handle,
                    slot,
                    delay,
                } => {
                    self.live_timers.insert((address, handle));
                    self.schedule(
                        self.current_time + delay,
                        Event::TimerFire {
                            node: address,
                            slot,
                            handle,
                        },
                    );
                }
                TimerCommand::Cancel(handle) => {
                    self.live_timers.remove(&(address, handle));
                }
            }
        }

        for data in outgoing {
            self.route_message(address, data);
        }

        for event in events {
            self.record_node_event(address, event);
        }
    }

    fn record_node_event(&mut self, address: NodeAddress, event: NodeEvent) {
        match event {
            NodeEvent::FileCompleted { file_id } => {
                let now = self.current_time;
                self.metrics.file_completions.push((now, address, file_id));
                let everywhere = self.nodes.values().all(|n| n.holds_in_full(file_id));
                if everywhere && !self.metrics.full_replication.contains_key(&file_id) {
                    info!(
                        file_id,
                        secs = now.as_secs_f64(),
                        "file fully replicated"
                    );
                    self.metrics.full_replication.insert(file_id, now);
                }
            }
            NodeEvent::Halted { reason } => {
                debug!(node = %address, %reason, "halt event");
                self.metrics.halted.insert(address);
            }
            NodeEvent::NeighborDiscovered { .. } | NodeEvent::ChunkReceived { .. } => {}
        }
    }

    /// Put one broadcast on the medium: every active neighbor gets its own
    /// copy, subject to that link's loss and delay.
    fn route_message(&mut self, sender: NodeAddress, data: Vec<u8>) {
        self.metrics.messages_sent += 1;
        self.metrics.bytes_sent += data.len() as u64;
        match peek_type(&data) {
            Some(PACKET_ADVERTISEMENT) => self.metrics.sent_by_kind.advertisements += 1,
            Some(PACKET_REQUEST) => self.metrics.sent_by_kind.requests += 1,
            Some(PACKET_REPLY) => self.metrics.sent_by_kind.replies += 1,
            _ => self.metrics.sent_by_kind.unknown += 1,
        }

        let airtime = self.airtime(data.len());
        let data: Rc<[u8]> = Rc::from(data);
        let now = self.current_time;

        let mut deliveries = Vec::new();
        for neighbor in self.topology.neighbors(sender) {
            let Some(link) = self.topology.get_link(sender, neighbor) else {
                continue;
            };
            let (loss_rate, delay) = (link.loss_rate, link.delay);
            if loss_rate > 0.0 && self.rng.gen::<f64>() < loss_rate {
                self.metrics.messages_dropped += 1;
                continue;
            }
            deliveries.push((neighbor, delay));
        }

        for (neighbor, delay) in deliveries {
            self.schedule(
                now + airtime + delay,
                Event::MessageDelivery {
                    to: neighbor,
                    from: sender,
                    data: Rc::clone(&data),
                },
            );
        }
    }

    fn airtime(&self, len: usize) -> Duration {
        match self.bitrate_bps {
            Some(bps) => Duration::from_micros((len as u64 * 8 * 1_000_000).div_ceil(bps)),
            None => Duration::ZERO,
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        debug!(?action, "scenario action");
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::SetGlobalLossRate { rate } => self.topology.set_global_loss_rate(rate),
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's completion state now.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = CompletionSnapshot::new(self.current_time);
        for (&address, node) in &self.nodes {
            snapshot.record_node(address, node.full_count(), node.chunks_held());
        }
        self.metrics.add_snapshot(snapshot);
    }
}
