//! Collaborator traits for transport, timers, time, and randomness.
//!
//! The engine never touches a socket, a clock or an event loop directly.
//! Hosts (a radio stack, a UDP daemon, the discrete-event simulator) supply
//! these four collaborators and feed inbound datagrams and timer expiries
//! back through `Node::handle_packet` and `Node::handle_timer`.

use core::fmt::Debug;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

use crate::time::{Duration, Timestamp};
use crate::types::{Event, TimerSlot};

/// Queue size for the event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 64;

/// Protocol event channel.
///
/// Single-threaded: the node and its host run on the same task.
pub type EventChannel = Channel<NoopRawMutex, Event, EVENT_QUEUE_SIZE>;

/// Broadcast datagram medium.
///
/// Fire-and-forget: delivery, loss and collisions are the medium's business.
/// Every node in radio range receives every datagram, including Requests and
/// Replies meant for someone else.
///
/// # Example
///
/// ```
/// use swarmcast::traits::Transport;
///
/// struct Loopback(Vec<Vec<u8>>);
///
/// impl Transport for Loopback {
///     fn broadcast(&mut self, data: Vec<u8>) {
///         self.0.push(data);
///     }
/// }
/// ```
pub trait Transport {
    fn broadcast(&mut self, data: Vec<u8>);
}

/// One-shot callback scheduling.
///
/// The node owns three logical slots and arms at most one callback per slot.
/// When a callback fires the host calls `Node::handle_timer(slot)`.
///
/// Cancellation must be synchronous and total: once `cancel` returns, the
/// callback behind that handle must never be delivered. Cancelling a handle
/// that already fired or was already cancelled is a no-op.
pub trait Scheduler {
    type Handle: Copy + Eq + Debug;

    /// Arm a callback for `slot`, `delay` after the current time.
    fn schedule_after(&mut self, delay: Duration, slot: TimerSlot) -> Self::Handle;

    fn cancel(&mut self, handle: Self::Handle);
}

/// Monotonic time source.
///
/// # Example
///
/// ```
/// use swarmcast::traits::test_impls::MockClock;
/// use swarmcast::traits::Clock;
/// use swarmcast::time::{Duration, Timestamp};
///
/// let clock = MockClock::new();
/// clock.advance(Duration::from_millis(12));
/// assert_eq!(clock.now(), Timestamp::from_millis(12));
/// ```
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Jitter source.
pub trait Random {
    /// Uniform value in `[min, max)`. Returns `min` when the range is empty.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use core::cell::Cell;

    use super::*;

    /// Records every broadcast frame.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        sent: Vec<Vec<u8>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Take all frames sent so far, oldest first.
        pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
            core::mem::take(&mut self.sent)
        }

        pub fn sent(&self) -> &[Vec<u8>] {
            &self.sent
        }
    }

    impl Transport for MockTransport {
        fn broadcast(&mut self, data: Vec<u8>) {
            self.sent.push(data);
        }
    }

    /// A callback armed through `MockScheduler` and not yet cancelled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArmedTimer {
        pub handle: u64,
        pub slot: TimerSlot,
        pub delay: Duration,
    }

    /// Scheduler that only records what was armed and cancelled.
    ///
    /// Tests fire timers by calling `Node::handle_timer` themselves.
    #[derive(Debug, Default)]
    pub struct MockScheduler {
        next_handle: u64,
        armed: Vec<ArmedTimer>,
        cancelled: u64,
    }

    impl MockScheduler {
        pub fn new() -> Self {
            Self::default()
        }

        /// Live callback for `slot`, if any.
        pub fn pending(&self, slot: TimerSlot) -> Option<ArmedTimer> {
            self.armed.iter().rev().find(|t| t.slot == slot).copied()
        }

        /// All live callbacks, oldest first.
        pub fn armed(&self) -> &[ArmedTimer] {
            &self.armed
        }

        /// Number of cancel calls that removed a live callback.
        pub fn cancelled_count(&self) -> u64 {
            self.cancelled
        }

        /// Forget a callback as if it had fired.
        pub fn fire(&mut self, slot: TimerSlot) -> Option<ArmedTimer> {
            let idx = self.armed.iter().rposition(|t| t.slot == slot)?;
            Some(self.armed.remove(idx))
        }
    }

    impl Scheduler for MockScheduler {
        type Handle = u64;

        fn schedule_after(&mut self, delay: Duration, slot: TimerSlot) -> u64 {
            let handle = self.next_handle;
            self.next_handle += 1;
            self.armed.push(ArmedTimer {
                handle,
                slot,
                delay,
            });
            handle
        }

        fn cancel(&mut self, handle: u64) {
            let before = self.armed.len();
            self.armed.retain(|t| t.handle != handle);
            if self.armed.len() != before {
                self.cancelled += 1;
            }
        }
    }

    /// Mock clock for testing (time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Timestamp {
            self.current.get()
        }
    }

    /// Deterministic LCG-based random source.
    pub struct MockRandom {
        state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            if max <= min {
                return min;
            }
            self.state = self
                .state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1);
            let range = max - min;
            min + (self.state % range)
        }
    }

    /// Random source that always returns the lower bound.
    ///
    /// Makes every jittered delay exactly its deterministic part.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ZeroRandom;

    impl Random for ZeroRandom {
        fn gen_range(&mut self, min: u64, _max: u64) -> u64 {
            min
        }
    }
}
