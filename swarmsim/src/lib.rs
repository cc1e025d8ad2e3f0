//! swarmsim - Discrete event simulator for the swarmcast protocol.
//!
//! Runs whole swarms of [`swarmcast`] nodes in one process, deterministically
//! and without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: events ordered by (time, sequence)
//! - **Topologies**: fully connected, chain, star, radio-range grid, random
//!   geometric, or custom link graphs
//! - **Link properties**: per-link loss, delay, and a shared medium bitrate
//! - **Scenario builder**: scheduled partitions, healing, loss changes
//! - **Initial catalogs**: Zipf-distributed file assignment
//! - **Metrics**: completion snapshots, traffic by packet kind, time to full
//!   replication of each file
//!
//! # Example
//!
//! ```
//! use swarmsim::{simple_scenario, CatalogConfig, Timestamp};
//!
//! let result = simple_scenario(3)
//!     .with_seed(7)
//!     .with_catalog(CatalogConfig {
//!         catalog_size: 4,
//!         max_files_per_node: 2,
//!         file_size_kb: 3,
//!         ..CatalogConfig::default()
//!     })
//!     .run_until_converged(Timestamp::from_secs(60))
//!     .unwrap();
//! assert!(result.converged());
//! ```
//!
//! # Architecture
//!
//! The main loop pops the earliest event, advances the clock, and calls the
//! target node's `handle_packet` or `handle_timer`. Afterwards it drains what
//! the handler produced: timer commands go onto the queue (cancellations
//! into the live-handle set), broadcasts are copied to every active neighbor
//! subject to link loss, and node events update the metrics.

pub mod catalog;
pub mod error;
pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

pub use catalog::{assign_initial_files, validate_initial_files, CatalogConfig, Zipf};
pub use error::SimError;
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{CompletionSnapshot, KindCounts, SimMetrics, SimulationResult};
pub use node::{SimNode, TimerCommand};
pub use scenario::{node_address, simple_scenario, ScenarioBuilder};
pub use sim::Simulator;
pub use swarmcast::{Duration, FileId, NodeAddress, Timestamp};
pub use topology::{GridLayout, Link, Topology};

#[cfg(test)]
mod tests {
    use super::*;

    fn small_catalog() -> CatalogConfig {
        CatalogConfig {
            catalog_size: 5,
            max_files_per_node: 2,
            file_size_kb: 4,
            ..CatalogConfig::default()
        }
    }

    #[test]
    fn test_single_node_converges_immediately() {
        let result = ScenarioBuilder::new(1)
            .with_catalog(small_catalog())
            .run_until_converged(Timestamp::from_secs(5))
            .expect("valid scenario");

        assert!(result.converged());
        assert_eq!(result.end_time, Timestamp::ZERO);
        assert_eq!(result.node_count, 1);
    }

    #[test]
    fn test_chain_topology_converges() {
        let result = ScenarioBuilder::new(5)
            .with_seed(11)
            .chain_topology()
            .with_catalog(small_catalog())
            .run_until_converged(Timestamp::from_secs(120))
            .expect("valid scenario");

        assert!(result.converged(), "chain should spread every file");
        assert_eq!(result.halted_count(), 0);
    }

    #[test]
    fn test_star_hub_relays_files() {
        let (mut sim, nodes) = ScenarioBuilder::new(4)
            .star_topology()
            .with_initial_files(vec![vec![], vec![(1, 4)], vec![(2, 4)], vec![(3, 4)]])
            .build()
            .expect("valid scenario");

        assert_eq!(sim.topology().neighbors(nodes[0]).len(), 3);
        let result = sim.run_until_converged(Timestamp::from_secs(60));

        assert!(result.converged());
        for &spoke in &nodes[1..] {
            assert!(sim.node(spoke).is_some_and(|n| n.full_count() == 3));
        }
    }
}
