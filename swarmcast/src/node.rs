//! Node struct and core implementation.

use core::marker::PhantomData;

use tracing::{debug, error, info, trace};

use crate::catalog::FileCatalog;
use crate::config::{DefaultConfig, NodeConfig};
use crate::neighbors::NeighborSet;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, EventChannel, Random, Scheduler, Transport};
use crate::types::{
    Event, FileId, NodeAddress, PendingRequest, ProtocolError, Reply, TimerSlot, TransportMetrics,
};
use crate::wire::{Decode, Encode, Message};

/// The per-node protocol engine.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `S`: Scheduler implementation
/// - `R`: Random number generator
/// - `Clk`: Clock implementation
/// - `Cfg`: Timing constants (defaults to `DefaultConfig`)
///
/// The node is purely reactive. The host calls `start()` once, then
/// `handle_packet()` for every received datagram and `handle_timer()` for
/// every callback armed through the scheduler.
pub struct Node<T, S: Scheduler, R, Clk, Cfg = DefaultConfig> {
    // Dependencies (injected)
    transport: T,
    scheduler: S,
    random: R,
    clock: Clk,

    events: EventChannel,

    address: NodeAddress,
    catalog: FileCatalog,
    neighbors: NeighborSet,

    /// Largest full-file count seen anywhere, including our own. Never
    /// decreases.
    max_full_files_observed: usize,

    // One pending callback per slot, plus the context the slot carries.
    timers: [Option<S::Handle>; 3],
    pending_request: Option<PendingRequest>,
    pending_reply: Option<Reply>,

    halted: Option<ProtocolError>,
    metrics: TransportMetrics,

    _config: PhantomData<Cfg>,
}

impl<T, S, R, Clk, Cfg> Node<T, S, R, Clk, Cfg>
where
    T: Transport,
    S: Scheduler,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    pub fn new(address: NodeAddress, transport: T, scheduler: S, random: R, clock: Clk) -> Self {
        Self {
            transport,
            scheduler,
            random,
            clock,

            events: EventChannel::new(),

            address,
            catalog: FileCatalog::new(),
            neighbors: NeighborSet::new(),

            max_full_files_observed: 0,

            timers: [None; 3],
            pending_request: None,
            pending_reply: None,

            halted: None,
            metrics: TransportMetrics::new(),

            _config: PhantomData,
        }
    }

    /// Seed the catalog with files held in full. Call before `start()`.
    pub fn set_initial_files(&mut self, files: &[(FileId, u32)]) {
        for &(id, size_kb) in files {
            self.catalog.insert_full(id, size_kb);
        }
        self.observe_full_count(self.catalog.full_count());
    }

    /// Arm the first advertisement immediately.
    pub fn start(&mut self) {
        if self.halted.is_some() {
            return;
        }
        info!(
            node = %self.address,
            files = self.catalog.full_count(),
            "node starting"
        );
        let delay = self.advertise_delay(true);
        self.arm(TimerSlot::Advertise, delay);
    }

    /// Handle one received datagram sent by `from`.
    ///
    /// Undecodable datagrams and our own echoes are dropped. Any other packet
    /// preempts every pending timer. A protocol violation halts the node and
    /// is returned; once halted, every call is a no-op.
    pub fn handle_packet(&mut self, data: &[u8], from: NodeAddress) -> Result<(), ProtocolError> {
        if self.halted.is_some() {
            trace!(node = %self.address, %from, "halted, packet ignored");
            return Ok(());
        }
        if from == self.address {
            trace!(node = %self.address, "own echo ignored");
            return Ok(());
        }

        let msg = match Message::decode_from_slice(data) {
            Ok(m) => m,
            Err(err) => {
                self.metrics.decode_failures += 1;
                debug!(
                    node = %self.address,
                    %from,
                    len = data.len(),
                    error = %err,
                    "dropping undecodable datagram"
                );
                return Ok(());
            }
        };

        self.cancel_all();
        if self.neighbors.record_seen(from) {
            debug!(node = %self.address, neighbor = %from, "neighbor discovered");
            self.push_event(Event::NeighborDiscovered { address: from });
        }

        let result = match msg {
            Message::Advertisement(adv) => {
                self.metrics.advertisements_received += 1;
                self.handle_advertisement(adv, from);
                Ok(())
            }
            Message::Request(req) => {
                self.metrics.requests_received += 1;
                self.handle_request(req, from)
            }
            Message::Reply(reply) => {
                self.metrics.replies_received += 1;
                self.handle_reply(reply, from);
                Ok(())
            }
        };

        if let Err(err) = result {
            self.halt(err);
        }
        result
    }

    /// Handle expiry of the callback armed for `slot`.
    ///
    /// Expiries for a slot with nothing armed are stale and ignored.
    pub fn handle_timer(&mut self, slot: TimerSlot) {
        if self.timers[slot.index()].take().is_none() {
            trace!(node = %self.address, ?slot, "stale timer ignored");
            return;
        }
        if self.halted.is_some() {
            return;
        }
        match slot {
            TimerSlot::Advertise => self.on_advertise_timer(),
            TimerSlot::Request => self.on_request_timer(),
            TimerSlot::Reply => self.on_reply_timer(),
        }
    }

    /// Delay until the next advertisement.
    ///
    /// Zero at start. Otherwise the swarm-wide offset, plus a richness term
    /// that shrinks as this node holds more full files, plus jitter.
    pub fn advertise_delay(&mut self, start: bool) -> Duration {
        if start {
            return Duration::ZERO;
        }
        let offset_ms = self.max_full_files_observed as u64 + Cfg::ADVERTISE_OFFSET_MS;
        let richness_us = match self.catalog.full_count() as u64 {
            0 => Cfg::ADVERTISE_RICHNESS_MS * 1_000,
            full => Cfg::ADVERTISE_RICHNESS_MS * 1_000 / full,
        };
        let jitter_us = self.random.gen_range(0, Cfg::ADVERTISE_JITTER_US);
        Duration::from_millis(offset_ms) + Duration::from_micros(richness_us + jitter_us)
    }

    /// Delay before pulling a chunk after hearing an advertisement.
    pub fn request_delay(&mut self) -> Duration {
        let base_ms = self.catalog.full_count() as u64 + 1;
        let jitter_us = self.random.gen_range(0, Cfg::REQUEST_JITTER_US);
        Duration::from_millis(base_ms) + Duration::from_micros(jitter_us)
    }

    // --- Public accessors ---

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn catalog(&self) -> &FileCatalog {
        &self.catalog
    }

    pub fn neighbors(&self) -> &NeighborSet {
        &self.neighbors
    }

    pub fn full_count(&self) -> usize {
        self.catalog.full_count()
    }

    pub fn max_full_files_observed(&self) -> usize {
        self.max_full_files_observed
    }

    pub fn pending_request(&self) -> Option<PendingRequest> {
        self.pending_request
    }

    pub fn pending_reply(&self) -> Option<Reply> {
        self.pending_reply
    }

    /// Whether `slot` holds a pending callback.
    pub fn is_armed(&self, slot: TimerSlot) -> bool {
        self.timers[slot.index()].is_some()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<ProtocolError> {
        self.halted
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Take every queued event, oldest first.
    pub fn drain_events(&self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_receive() {
            out.push(event);
        }
        out
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    // --- Internal helpers for other modules ---

    pub(crate) fn catalog_mut(&mut self) -> &mut FileCatalog {
        &mut self.catalog
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut TransportMetrics {
        &mut self.metrics
    }

    pub(crate) fn push_event(&mut self, event: Event) {
        let _ = self.events.try_send(event);
    }

    /// Raise the swarm-wide full-file high-water mark.
    pub(crate) fn observe_full_count(&mut self, count: usize) {
        if count > self.max_full_files_observed {
            trace!(
                node = %self.address,
                from = self.max_full_files_observed,
                to = count,
                "full-file high-water mark raised"
            );
            self.max_full_files_observed = count;
        }
    }

    /// Arm `slot`, replacing any callback already pending there.
    pub(crate) fn arm(&mut self, slot: TimerSlot, delay: Duration) {
        if let Some(old) = self.timers[slot.index()].take() {
            self.scheduler.cancel(old);
        }
        let handle = self.scheduler.schedule_after(delay, slot);
        self.timers[slot.index()] = Some(handle);
        trace!(
            node = %self.address,
            ?slot,
            delay_us = delay.as_micros(),
            "timer armed"
        );
    }

    pub(crate) fn arm_request(&mut self, target: NodeAddress, file_id: FileId, delay: Duration) {
        self.arm(TimerSlot::Request, delay);
        self.pending_request = Some(PendingRequest { target, file_id });
    }

    pub(crate) fn arm_reply(&mut self, reply: Reply) {
        self.arm(TimerSlot::Reply, Duration::ZERO);
        self.pending_reply = Some(reply);
    }

    pub(crate) fn rearm_advertise(&mut self) {
        let delay = self.advertise_delay(false);
        self.arm(TimerSlot::Advertise, delay);
    }

    pub(crate) fn take_pending_request(&mut self) -> Option<PendingRequest> {
        self.pending_request.take()
    }

    pub(crate) fn take_pending_reply(&mut self) -> Option<Reply> {
        self.pending_reply.take()
    }

    /// Cancel every slot and drop the context they carried.
    pub(crate) fn cancel_all(&mut self) {
        for slot in TimerSlot::ALL {
            if let Some(handle) = self.timers[slot.index()].take() {
                self.scheduler.cancel(handle);
            }
        }
        self.pending_request = None;
        self.pending_reply = None;
    }

    /// Encode and broadcast.
    pub(crate) fn send(&mut self, msg: Message) {
        match &msg {
            Message::Advertisement(_) => self.metrics.advertisements_sent += 1,
            Message::Request(_) => self.metrics.requests_sent += 1,
            Message::Reply(_) => self.metrics.replies_sent += 1,
        }
        let data = msg.encode_to_vec();
        trace!(
            node = %self.address,
            kind = msg.kind(),
            len = data.len(),
            "broadcast"
        );
        self.transport.broadcast(data);
    }

    fn halt(&mut self, err: ProtocolError) {
        error!(node = %self.address, error = %err, "protocol violation, halting");
        self.cancel_all();
        self.halted = Some(err);
        self.push_event(Event::Halted { reason: err });
    }
}


#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use super::*;
    use crate::types::{Advertisement, Request};

    #[test]
    fn test_node_creation() {
        let node = test_node(1);
        assert_eq!(node.address(), addr(1));
        assert!(node.catalog().is_empty());
        assert!(node.neighbors().is_empty());
        assert!(!node.is_halted());
        for slot in TimerSlot::ALL {
            assert!(!node.is_armed(slot));
        }
    }

    #[test]
    fn test_start_arms_advertise_at_zero() {
        let mut node = test_node(1);
        node.start();
        let armed = node
            .scheduler()
            .pending(TimerSlot::Advertise)
            .expect("advertise armed");
        assert_eq!(armed.delay, Duration::ZERO);
        assert!(!node.is_armed(TimerSlot::Request));
        assert!(!node.is_armed(TimerSlot::Reply));
    }

    #[test]
    fn test_advertise_delay_without_full_files() {
        let mut node = test_node(1);
        // offset 10 ms + richness 50 ms, zero jitter
        assert_eq!(node.advertise_delay(false), Duration::from_millis(60));
        assert_eq!(node.advertise_delay(true), Duration::ZERO);
    }

    #[test]
    fn test_advertise_delay_shrinks_with_richness() {
        let mut node = test_node(1);
        node.set_initial_files(&[(1, 10), (2, 10), (3, 10), (4, 10)]);
        // offset 4 + 10 ms, richness 50 / 4 = 12.5 ms
        assert_eq!(node.advertise_delay(false), Duration::from_micros(26_500));
    }

    #[test]
    fn test_request_delay_grows_with_full_files() {
        let mut node = test_node(1);
        assert_eq!(node.request_delay(), Duration::from_millis(1));
        node.set_initial_files(&[(1, 10), (2, 10)]);
        assert_eq!(node.request_delay(), Duration::from_millis(3));
    }

    #[test]
    fn test_delays_stay_within_jitter_bounds() {
        let mut node = jittery_node(1, 99);
        for _ in 0..200 {
            let adv = node.advertise_delay(false);
            assert!(adv >= Duration::from_millis(60) && adv < Duration::from_millis(75));
            let req = node.request_delay();
            assert!(req >= Duration::from_millis(1) && req < Duration::from_millis(11));
        }
    }

    #[test]
    fn test_high_water_mark_includes_own_files() {
        let mut node = test_node(1);
        node.set_initial_files(&[(1, 10), (2, 10), (3, 10)]);
        assert_eq!(node.max_full_files_observed(), 3);
    }

    #[test]
    fn test_undecodable_packet_is_dropped() {
        let mut node = test_node(1);
        node.start();
        assert_eq!(node.handle_packet(&[0xFF, 1, 2], addr(2)), Ok(()));
        assert_eq!(node.metrics().decode_failures, 1);
        assert!(node.neighbors().is_empty());
        // Noise does not preempt the pending advertisement.
        assert!(node.is_armed(TimerSlot::Advertise));
    }

    #[test]
    fn test_own_echo_is_dropped() {
        let mut node = test_node(1);
        let adv = Message::Advertisement(Advertisement::default()).encode_to_vec();
        node.handle_packet(&adv, addr(1)).unwrap();
        assert!(node.neighbors().is_empty());
        assert_eq!(node.metrics().advertisements_received, 0);
    }

    #[test]
    fn test_neighbor_discovery_event() {
        let mut node = test_node(1);
        let adv = Message::Advertisement(Advertisement::default()).encode_to_vec();
        node.handle_packet(&adv, addr(2)).unwrap();
        node.handle_packet(&adv, addr(2)).unwrap();
        assert_eq!(
            node.drain_events(),
            vec![Event::NeighborDiscovered { address: addr(2) }]
        );
        assert_eq!(node.neighbors().len(), 1);
    }

    #[test]
    fn test_stale_timer_ignored() {
        let mut node = test_node(1);
        node.handle_timer(TimerSlot::Reply);
        assert!(node.transport().sent().is_empty());
    }

    #[test]
    fn test_violation_halts_node() {
        let mut node = test_node(1);
        node.start();
        let req = Message::Request(Request {
            target: addr(1),
            file_id: 42,
            chunk_id: 0,
        })
        .encode_to_vec();

        let err = node.handle_packet(&req, addr(2)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnknownFile {
                requester: addr(2),
                file_id: 42
            }
        );
        assert!(node.is_halted());
        assert_eq!(node.halt_reason(), Some(err));
        assert!(node.scheduler().armed().is_empty());
        for slot in TimerSlot::ALL {
            assert!(!node.is_armed(slot));
        }
        assert!(node
            .drain_events()
            .contains(&Event::Halted { reason: err }));

        // Everything afterwards is ignored.
        let adv = Message::Advertisement(Advertisement::default()).encode_to_vec();
        assert_eq!(node.handle_packet(&adv, addr(3)), Ok(()));
        assert!(!node.neighbors().contains(addr(3)));
        node.start();
        assert!(!node.is_armed(TimerSlot::Advertise));
    }
}
