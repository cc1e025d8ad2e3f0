//! Compile-time protocol tuning.
//!
//! The `NodeConfig` trait carries the constants of the timing model. The
//! engine is generic over it so simulations can stretch or compress the
//! schedule without touching protocol code.
//!
//! # Example
//!
//! ```
//! use swarmcast::NodeConfig;
//!
//! struct SlowConfig;
//! impl NodeConfig for SlowConfig {
//!     const ADVERTISE_OFFSET_MS: u64 = 100;
//!     const ADVERTISE_RICHNESS_MS: u64 = 500;
//!     const ADVERTISE_JITTER_US: u64 = 150_000;
//!     const REQUEST_JITTER_US: u64 = 100_000;
//!     const MAX_ADVERTISED_FILES: usize = 64;
//! }
//! ```

use crate::types::MAX_ADVERTISED_FILES;

/// Timing and sizing constants for a node.
///
/// Jitter bounds are exclusive upper bounds of a uniform draw. All values
/// must be non-zero.
pub trait NodeConfig {
    /// Fixed part of the advertise interval, added to the largest full-file
    /// count seen in the swarm.
    const ADVERTISE_OFFSET_MS: u64;

    /// Richness term numerator. Divided by the node's own full-file count, so
    /// nodes holding more files advertise sooner.
    const ADVERTISE_RICHNESS_MS: u64;

    /// Advertise jitter bound in microseconds.
    const ADVERTISE_JITTER_US: u64;

    /// Request jitter bound in microseconds.
    const REQUEST_JITTER_US: u64;

    /// Entries per Advertisement. Clamped to the one-byte wire count.
    const MAX_ADVERTISED_FILES: usize;
}

/// Timing of the reference deployment: 10 ms offset, 50 ms richness term,
/// 15 ms advertise jitter and 10 ms request jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NodeConfig for DefaultConfig {
    const ADVERTISE_OFFSET_MS: u64 = 10;
    const ADVERTISE_RICHNESS_MS: u64 = 50;
    const ADVERTISE_JITTER_US: u64 = 15_000;
    const REQUEST_JITTER_US: u64 = 10_000;
    const MAX_ADVERTISED_FILES: usize = MAX_ADVERTISED_FILES;
}
