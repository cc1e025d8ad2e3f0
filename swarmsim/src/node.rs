//! SimNode wrapper for simulated swarmcast nodes.

use std::cell::Cell;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use swarmcast::config::DefaultConfig;
use swarmcast::traits::{Clock, Random, Scheduler, Transport};
use swarmcast::{
    Duration, Event, FileId, Node, NodeAddress, ProtocolError, TimerSlot, Timestamp,
};

/// Transport that queues broadcasts until the simulator routes them.
#[derive(Debug, Default)]
pub struct SimTransport {
    outbox: Vec<Vec<u8>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every frame broadcast since the last call.
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }
}

impl Transport for SimTransport {
    fn broadcast(&mut self, data: Vec<u8>) {
        self.outbox.push(data);
    }
}

/// A scheduling request recorded by [`SimScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Schedule {
        handle: u64,
        slot: TimerSlot,
        delay: Duration,
    },
    Cancel(u64),
}

/// Scheduler that records commands for the simulator to apply.
///
/// The simulator drains the commands after every handler, before any other
/// event is dispatched, so a cancellation always lands before the cancelled
/// callback could fire.
#[derive(Debug, Default)]
pub struct SimScheduler {
    next_handle: u64,
    commands: Vec<TimerCommand>,
}

impl SimScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_commands(&mut self) -> Vec<TimerCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl Scheduler for SimScheduler {
    type Handle = u64;

    fn schedule_after(&mut self, delay: Duration, slot: TimerSlot) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.commands.push(TimerCommand::Schedule {
            handle,
            slot,
            delay,
        });
        handle
    }

    fn cancel(&mut self, handle: u64) {
        self.commands.push(TimerCommand::Cancel(handle));
    }
}

/// Clock driven by the simulator.
#[derive(Debug, Default)]
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        self.current.get()
    }
}

/// Seeded jitter source.
#[derive(Debug)]
pub struct SimRandom {
    rng: ChaCha8Rng,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..max)
    }
}

pub type SimNodeInner = Node<SimTransport, SimScheduler, SimRandom, SimClock, DefaultConfig>;

/// A swarmcast node plus the simulated collaborators it runs on.
pub struct SimNode {
    inner: SimNodeInner,
    /// Catalog entries assigned at bootstrap.
    initial_files: Vec<(FileId, u32)>,
}

impl SimNode {
    /// Create a node whose jitter is seeded from `seed`.
    pub fn new(address: NodeAddress, seed: u64, created_at: Timestamp) -> Self {
        let inner = Node::new(
            address,
            SimTransport::new(),
            SimScheduler::new(),
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
        );
        Self {
            inner,
            initial_files: Vec::new(),
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.inner.address()
    }

    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    pub fn initial_files(&self) -> &[(FileId, u32)] {
        &self.initial_files
    }

    /// Seed the node's catalog. Must precede [`SimNode::start`].
    pub fn set_initial_files(&mut self, files: &[(FileId, u32)]) {
        self.initial_files = files.to_vec();
        self.inner.set_initial_files(files);
    }

    pub fn start(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.start();
    }

    pub fn handle_packet(
        &mut self,
        data: &[u8],
        from: NodeAddress,
        now: Timestamp,
    ) -> Result<(), ProtocolError> {
        self.inner.clock().set(now);
        self.inner.handle_packet(data, from)
    }

    pub fn handle_timer(&mut self, slot: TimerSlot, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_timer(slot);
    }

    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        self.inner.transport_mut().take_sent()
    }

    pub fn take_timer_commands(&mut self) -> Vec<TimerCommand> {
        self.inner.scheduler_mut().take_commands()
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.inner.drain_events()
    }

    pub fn full_count(&self) -> usize {
        self.inner.full_count()
    }

    /// Chunks held across every known file.
    pub fn chunks_held(&self) -> u64 {
        self.inner
            .catalog()
            .iter()
            .map(|record| u64::from(record.received_count()))
            .sum()
    }

    pub fn holds_in_full(&self, file_id: FileId) -> bool {
        self.inner
            .catalog()
            .find_by_id(file_id)
            .is_some_and(|record| record.is_full())
    }

    pub fn is_halted(&self) -> bool {
        self.inner.is_halted()
    }
}
