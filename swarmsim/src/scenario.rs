//! Scenario builder for setting up and running simulations.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use swarmcast::{Duration, FileId, NodeAddress, Timestamp};
use tracing::info;

use crate::catalog::{assign_initial_files, validate_initial_files, CatalogConfig};
use crate::error::SimError;
use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::{GridLayout, Topology};

/// First simulated address, 10.1.1.1.
pub const BASE_ADDRESS: u32 = 0x0A01_0101;

/// 802.11a at 24 Mbit/s.
pub const DEFAULT_BITRATE_BPS: u64 = 24_000_000;

/// Address of the node at `index`.
pub fn node_address(index: usize) -> NodeAddress {
    NodeAddress::new(BASE_ADDRESS.wrapping_add(index as u32))
}

#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    Chain,
    Star,
    Grid(GridLayout),
    RandomGeometric { radius: f64 },
    RandomGeometricAdaptive,
    Custom(Topology),
}

/// A scheduled action whose node references are still indices.
#[derive(Debug, Clone)]
enum PlannedAction {
    Partition(Vec<Vec<usize>>),
    Ready(ScenarioAction),
}

/// Builder for simulation scenarios.
///
/// Nodes get addresses 10.1.1.1 upward in index order. Unless given
/// explicitly, initial files are drawn from the [`CatalogConfig`].
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    num_nodes: usize,
    seed: u64,
    topology_type: TopologyType,
    loss_rate: f64,
    delay: Option<Duration>,
    bitrate_bps: Option<u64>,
    catalog: CatalogConfig,
    initial_files: Option<Vec<Vec<(FileId, u32)>>>,
    actions: Vec<(Timestamp, PlannedAction)>,
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(25)
    }
}

impl ScenarioBuilder {
    /// A grid of `num_nodes` at 24 Mbit/s with the default catalog.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: TopologyType::Grid(GridLayout::default()),
            loss_rate: 0.0,
            delay: None,
            bitrate_bps: Some(DEFAULT_BITRATE_BPS),
            catalog: CatalogConfig::default(),
            initial_files: None,
            actions: Vec::new(),
            snapshot_interval: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = TopologyType::Custom(topo);
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = TopologyType::FullyConnected;
        self
    }

    pub fn chain_topology(mut self) -> Self {
        self.topology_type = TopologyType::Chain;
        self
    }

    /// First node is the hub.
    pub fn star_topology(mut self) -> Self {
        self.topology_type = TopologyType::Star;
        self
    }

    pub fn grid(mut self, layout: GridLayout) -> Self {
        self.topology_type = TopologyType::Grid(layout);
        self
    }

    pub fn random_geometric(mut self, radius: f64) -> Self {
        self.topology_type = TopologyType::RandomGeometric { radius };
        self
    }

    pub fn random_geometric_adaptive(mut self) -> Self {
        self.topology_type = TopologyType::RandomGeometricAdaptive;
        self
    }

    /// Loss rate applied to every link.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate;
        self
    }

    /// Propagation delay applied to every link.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Medium bitrate; `None` disables airtime.
    pub fn with_bitrate(mut self, bitrate_bps: Option<u64>) -> Self {
        self.bitrate_bps = bitrate_bps;
        self
    }

    pub fn with_catalog(mut self, catalog: CatalogConfig) -> Self {
        self.catalog = catalog;
        self
    }

    /// Use these initial files, one list per node index, instead of drawing
    /// them. Nodes past the end of the list start empty.
    pub fn with_initial_files(mut self, files: Vec<Vec<(FileId, u32)>>) -> Self {
        self.initial_files = Some(files);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Split the network into groups of node indices at `time`.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<usize>>) -> Self {
        self.actions.push((time, PlannedAction::Partition(groups)));
        self
    }

    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions
            .push((time, PlannedAction::Ready(ScenarioAction::HealPartition)));
        self
    }

    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions
            .push((time, PlannedAction::Ready(ScenarioAction::TakeSnapshot)));
        self
    }

    pub fn action_at(mut self, time: Timestamp, action: ScenarioAction) -> Self {
        self.actions.push((time, PlannedAction::Ready(action)));
        self
    }

    fn validate(&self) -> Result<(), SimError> {
        if self.num_nodes == 0 {
            return Err(SimError::NoNodes);
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(SimError::InvalidLossRate(self.loss_rate));
        }
        match &self.initial_files {
            Some(files) => validate_initial_files(files)?,
            None => self.catalog.validate()?,
        }
        Ok(())
    }

    /// Build the simulator with every node started at time zero.
    pub fn build(self) -> Result<(Simulator, Vec<NodeAddress>), SimError> {
        self.validate()?;

        let addresses: Vec<NodeAddress> = (0..self.num_nodes).map(node_address).collect();

        let mut topo = match self.topology_type {
            TopologyType::FullyConnected => Topology::fully_connected(&addresses),
            TopologyType::Chain => Topology::chain(&addresses),
            TopologyType::Star => Topology::star(&addresses),
            TopologyType::Grid(layout) => Topology::grid(&addresses, layout),
            TopologyType::RandomGeometric { radius } => {
                Topology::random_geometric(&addresses, self.seed, radius)
            }
            TopologyType::RandomGeometricAdaptive => {
                Topology::random_geometric_adaptive(&addresses, self.seed)
            }
            TopologyType::Custom(t) => t,
        };
        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        if let Some(delay) = self.delay {
            topo.set_global_delay(delay);
        }

        let files = match self.initial_files {
            Some(files) => files,
            None => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                assign_initial_files(&self.catalog, self.num_nodes, &mut rng)?
            }
        };

        let mut sim = Simulator::new(self.seed).with_topology(topo);
        if let Some(bps) = self.bitrate_bps {
            sim = sim.with_bitrate(bps);
        }
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        for (i, &address) in addresses.iter().enumerate() {
            let node_files = files.get(i).map(Vec::as_slice).unwrap_or(&[]);
            let node_seed = self.seed.wrapping_add(i as u64 * 1000);
            sim.add_node(address, node_seed, node_files);
        }
        info!(
            nodes = addresses.len(),
            links = sim.topology().link_count(),
            catalog = sim.initial_catalog().len(),
            "scenario built"
        );

        for (time, action) in self.actions {
            let action = match action {
                PlannedAction::Partition(groups) => ScenarioAction::Partition {
                    groups: groups
                        .into_iter()
                        .map(|g| g.into_iter().filter_map(|i| addresses.get(i).copied()).collect())
                        .collect(),
                },
                PlannedAction::Ready(action) => action,
            };
            sim.schedule_action(time, action);
        }

        Ok((sim, addresses))
    }

    pub fn run_for(self, duration: Duration) -> Result<SimulationResult, SimError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_for(duration))
    }

    pub fn run_until(self, time: Timestamp) -> Result<SimulationResult, SimError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_until(time))
    }

    /// Run until every node holds every file, or `deadline`.
    pub fn run_until_converged(self, deadline: Timestamp) -> Result<SimulationResult, SimError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_until_converged(deadline))
    }
}

/// `num_nodes` fully connected nodes.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).fully_connected()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_catalog() -> CatalogConfig {
        CatalogConfig {
            catalog_size: 6,
            max_files_per_node: 2,
            file_size_kb: 5,
            ..CatalogConfig::default()
        }
    }

    #[test]
    fn test_node_addresses_dotted() {
        assert_eq!(node_address(0).to_string(), "10.1.1.1");
        assert_eq!(node_address(24).to_string(), "10.1.1.25");
    }

    #[test]
    fn test_scenario_builder_basic() {
        let (sim, nodes) = ScenarioBuilder::new(3)
            .with_seed(123)
            .fully_connected()
            .build()
            .expect("valid scenario");

        assert_eq!(nodes.len(), 3);
        assert_eq!(sim.node_addresses(), nodes);
        for &node in &nodes {
            let files = sim.node(node).map(|n| n.initial_files().len()).unwrap_or(0);
            assert!((1..=10).contains(&files));
        }
    }

    #[test]
    fn test_default_is_grid() {
        let (sim, nodes) = ScenarioBuilder::new(25).build().expect("valid scenario");
        assert!(sim.topology().is_connected(nodes[0], nodes[10]));
        assert!(!sim.topology().is_connected(nodes[0], nodes[24]));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert_eq!(
            ScenarioBuilder::new(0).build().err(),
            Some(SimError::NoNodes)
        );
        assert_eq!(
            ScenarioBuilder::new(2).with_loss_rate(1.5).build().err(),
            Some(SimError::InvalidLossRate(1.5))
        );
        let bad_catalog = CatalogConfig {
            catalog_size: 0,
            ..CatalogConfig::default()
        };
        assert_eq!(
            ScenarioBuilder::new(2).with_catalog(bad_catalog).build().err(),
            Some(SimError::EmptyCatalog)
        );
    }

    #[test]
    fn test_oversized_files_rejected() {
        let big_file = CatalogConfig {
            file_size_kb: 65_537,
            ..small_catalog()
        };
        assert_eq!(
            ScenarioBuilder::new(2).with_catalog(big_file).build().err(),
            Some(SimError::FileSizeTooLarge { file_size_kb: 65_537 })
        );
        assert_eq!(
            ScenarioBuilder::new(2)
                .fully_connected()
                .with_initial_files(vec![vec![(1, 65_537)]])
                .build()
                .err(),
            Some(SimError::FileSizeTooLarge { file_size_kb: 65_537 })
        );
        assert_eq!(
            ScenarioBuilder::new(2)
                .with_initial_files(vec![vec![], vec![(65_536, 10)]])
                .run_until_converged(Timestamp::from_secs(10))
                .err(),
            Some(SimError::FileIdTooLarge { file_id: 65_536 })
        );
    }

    #[test]
    fn test_scenario_with_loss_and_delay() {
        let (sim, nodes) = ScenarioBuilder::new(2)
            .fully_connected()
            .with_loss_rate(0.5)
            .with_delay(Duration::from_millis(2))
            .build()
            .expect("valid scenario");

        let link = sim.topology().get_link(nodes[0], nodes[1]).expect("link");
        assert_eq!(link.loss_rate, 0.5);
        assert_eq!(link.delay, Duration::from_millis(2));
    }

    #[test]
    fn test_explicit_initial_files() {
        let (sim, nodes) = ScenarioBuilder::new(3)
            .with_initial_files(vec![vec![(1, 10)], vec![(2, 10)]])
            .build()
            .expect("valid scenario");

        assert!(sim.node(nodes[0]).is_some_and(|n| n.holds_in_full(1)));
        assert!(sim.node(nodes[2]).is_some_and(|n| n.initial_files().is_empty()));
        assert_eq!(sim.initial_catalog().len(), 2);
    }

    #[test]
    fn test_scenario_partition() {
        let (mut sim, nodes) = ScenarioBuilder::new(4)
            .fully_connected()
            .with_catalog(small_catalog())
            .partition_at(Timestamp::from_millis(500), vec![vec![0, 1], vec![2, 3]])
            .build()
            .expect("valid scenario");

        assert!(sim.topology().is_connected(nodes[0], nodes[2]));
        sim.run_for(Duration::from_secs(1));

        assert!(!sim.topology().is_connected(nodes[0], nodes[2]));
        assert!(sim.topology().is_connected(nodes[0], nodes[1]));
        assert!(sim.topology().is_connected(nodes[2], nodes[3]));
    }

    #[test]
    fn test_simple_scenario_converges() {
        let result = simple_scenario(4)
            .with_catalog(small_catalog())
            .with_snapshot_interval(Duration::from_millis(250))
            .run_until_converged(Timestamp::from_secs(60))
            .expect("valid scenario");

        assert!(result.converged());
        assert_eq!(result.final_complete_nodes(), 4);
        assert_eq!(result.halted_count(), 0);
        assert!(result.metrics.full_replication_time(result.catalog_len).is_some());
    }
}
