#![forbid(unsafe_code)]
//! swarmcast - Epidemic file-chunk dissemination for wireless broadcast networks
//!
//! Every node starts with a subset of a shared file catalog. Nodes advertise
//! the files they hold in full, pull missing chunks from advertisers one at a
//! time, and store every chunk they overhear, until the whole swarm holds
//! every file.
//!
//! # Key Properties
//!
//! - Rarest-first: a node pulls the file it is closest to completing, and
//!   among equals the one fewest neighbors hold
//! - Self-tuning timing: nodes holding more files advertise sooner, and every
//!   node backs off as the swarm's full-file high-water mark rises
//! - Preemption: any packet on the medium cancels a node's pending timers,
//!   so at most one exchange is in flight per neighborhood
//! - Chunk bodies are opaque; only their lengths travel
//!
//! # Example (basic usage)
//!
//! ```
//! use swarmcast::{Node, NodeAddress, TimerSlot};
//! use swarmcast::traits::test_impls::{MockClock, MockRandom, MockScheduler, MockTransport};
//!
//! let mut node: Node<_, _, _, _> = Node::new(
//!     NodeAddress::new(0x0A00_0001),
//!     MockTransport::new(),
//!     MockScheduler::new(),
//!     MockRandom::new(),
//!     MockClock::new(),
//! );
//! node.set_initial_files(&[(7, 1000)]);
//! node.start();
//!
//! // The host fires the first advertisement.
//! node.scheduler_mut().fire(TimerSlot::Advertise);
//! node.handle_timer(TimerSlot::Advertise);
//! assert_eq!(node.transport_mut().take_sent().len(), 1);
//! assert!(node.is_armed(TimerSlot::Advertise));
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Addresses, packets, events, errors
//! - [`wire`] - Wire format serialization
//! - [`traits`] - Transport, Scheduler, Clock, Random traits
//! - [`file`] - Per-file chunk bitmap
//! - [`catalog`] - File catalog and selection policy
//! - [`neighbors`] - Observed peers
//! - [`node`] - Main Node struct and public API
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Compile-time timing configuration

#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It exposes mock collaborators intended only for tests and simulation."
);

mod advertise;
pub mod catalog;
pub mod config;
pub mod file;
pub mod neighbors;
pub mod node;
pub mod time;
pub mod traits;
mod transfer;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use catalog::FileCatalog;
pub use config::{DefaultConfig, NodeConfig};
pub use file::FileRecord;
pub use neighbors::NeighborSet;
pub use node::Node;
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Random, Scheduler, Transport};
pub use types::{
    AdvertisedFile, Advertisement, Event, FileId, NodeAddress, PendingRequest, ProtocolError,
    Reply, Request, TimerSlot, TransportMetrics, CHUNK_SIZE,
};
pub use wire::{DecodeError, Message};
