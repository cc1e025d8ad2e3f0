//! Link graph between simulated nodes.
//!
//! Every transmission is a broadcast; a node's neighbors are exactly the
//! nodes it shares an active link with.

use std::collections::BTreeSet;

use hashbrown::HashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use swarmcast::{Duration, NodeAddress};

/// Properties of a bidirectional link.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Probability that one transmission over this link is lost (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay: Duration::from_micros(100),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Node placement on a rectangular grid, filled row first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    /// Nodes per row.
    pub width: usize,
    /// Horizontal spacing in meters.
    pub dx: f64,
    /// Vertical spacing in meters.
    pub dy: f64,
    /// Radio range in meters; nodes closer than this share a link.
    pub range: f64,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            width: 5,
            dx: 5.0,
            dy: 10.0,
            range: 25.0,
        }
    }
}

impl GridLayout {
    /// Position of the node at `index`.
    pub fn position(&self, index: usize) -> (f64, f64) {
        let width = self.width.max(1);
        let col = index % width;
        let row = index / width;
        (col as f64 * self.dx, row as f64 * self.dy)
    }
}

/// Network topology defining connectivity between nodes.
#[derive(Debug, Clone)]
pub struct Topology {
    links: HashMap<(NodeAddress, NodeAddress), Link>,
    default_link: Link,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
            default_link: Link::default(),
        }
    }

    /// Use `link` as the template for links created by the builders below.
    pub fn with_default_link(mut self, link: Link) -> Self {
        self.default_link = link;
        self
    }

    pub fn fully_connected(nodes: &[NodeAddress]) -> Self {
        Self::new().connect_all(nodes)
    }

    /// Each node linked only to its predecessor and successor.
    pub fn chain(nodes: &[NodeAddress]) -> Self {
        Self::new().connect_chain(nodes)
    }

    /// First node is the hub; every other node sees only the hub.
    pub fn star(nodes: &[NodeAddress]) -> Self {
        Self::new().connect_star(nodes)
    }

    /// Nodes placed on a grid; pairs within radio range are linked.
    pub fn grid(nodes: &[NodeAddress], layout: GridLayout) -> Self {
        Self::new().connect_grid(nodes, layout)
    }

    /// Nodes placed uniformly in the unit square from `seed`; pairs within
    /// `radius` are linked. Components are then joined by their shortest
    /// gaps so the graph is connected.
    pub fn random_geometric(nodes: &[NodeAddress], seed: u64, radius: f64) -> Self {
        Self::new().connect_random_geometric(nodes, seed, radius)
    }

    /// [`Topology::random_geometric`] with a radius giving about five
    /// neighbors per node.
    pub fn random_geometric_adaptive(nodes: &[NodeAddress], seed: u64) -> Self {
        Self::random_geometric(nodes, seed, compute_adaptive_radius(nodes.len()))
    }

    pub fn connect_all(mut self, nodes: &[NodeAddress]) -> Self {
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                self.add_default_link(a, b);
            }
        }
        self
    }

    pub fn connect_chain(mut self, nodes: &[NodeAddress]) -> Self {
        for pair in nodes.windows(2) {
            self.add_default_link(pair[0], pair[1]);
        }
        self
    }

    pub fn connect_star(mut self, nodes: &[NodeAddress]) -> Self {
        if let Some((&hub, spokes)) = nodes.split_first() {
            for &spoke in spokes {
                self.add_default_link(hub, spoke);
            }
        }
        self
    }

    pub fn connect_grid(mut self, nodes: &[NodeAddress], layout: GridLayout) -> Self {
        let positions: Vec<_> = (0..nodes.len()).map(|i| layout.position(i)).collect();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if distance(positions[i], positions[j]) <= layout.range {
                    self.add_default_link(nodes[i], nodes[j]);
                }
            }
        }
        self
    }

    pub fn connect_random_geometric(
        mut self,
        nodes: &[NodeAddress],
        seed: u64,
        radius: f64,
    ) -> Self {
        if nodes.len() <= 1 {
            return self;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let positions: Vec<(f64, f64)> = (0..nodes.len())
            .map(|_| (rng.gen::<f64>(), rng.gen::<f64>()))
            .collect();

        let mut edges = Vec::new();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let dist = distance(positions[i], positions[j]);
                edges.push((i, j, dist));
                if dist <= radius {
                    self.add_default_link(nodes[i], nodes[j]);
                }
            }
        }

        self.ensure_connectivity(nodes, &mut edges);
        self
    }

    /// Insert or replace the link between `a` and `b`.
    pub fn add_link(&mut self, a: NodeAddress, b: NodeAddress, link: Link) {
        self.links.insert(canonical_pair(a, b), link);
    }

    fn add_default_link(&mut self, a: NodeAddress, b: NodeAddress) {
        let link = self.default_link.clone();
        self.add_link(a, b, link);
    }

    pub fn get_link(&self, a: NodeAddress, b: NodeAddress) -> Option<&Link> {
        self.links.get(&canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: NodeAddress, b: NodeAddress) -> Option<&mut Link> {
        self.links.get_mut(&canonical_pair(a, b))
    }

    /// Link exists and is active.
    pub fn is_connected(&self, a: NodeAddress, b: NodeAddress) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Nodes reachable from `node` over active links, in address order.
    pub fn neighbors(&self, node: NodeAddress) -> Vec<NodeAddress> {
        let mut result: Vec<NodeAddress> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort_unstable();
        result
    }

    /// Whether every node in `nodes` can reach every other over active links.
    pub fn is_fully_reachable(&self, nodes: &[NodeAddress]) -> bool {
        let Some(&start) = nodes.first() else {
            return true;
        };
        let mut seen = BTreeSet::from([start]);
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for next in self.neighbors(current) {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        nodes.iter().all(|n| seen.contains(n))
    }

    /// Disable every link whose endpoints fall in different groups. Nodes
    /// missing from all groups form a group of their own.
    pub fn partition(&mut self, groups: &[Vec<NodeAddress>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }

    pub fn default_link(&self) -> &Link {
        &self.default_link
    }

    /// Join components with the shortest missing edges (Kruskal).
    fn ensure_connectivity(&mut self, nodes: &[NodeAddress], edges: &mut [(usize, usize, f64)]) {
        edges.sort_by(|a, b| a.2.total_cmp(&b.2));

        let mut sets = DisjointSets::new(nodes.len());
        for &(i, j, _) in edges.iter() {
            if self.is_connected(nodes[i], nodes[j]) {
                sets.union(i, j);
            }
        }

        for &(i, j, _) in edges.iter() {
            if sets.components() == 1 {
                return;
            }
            if sets.union(i, j) {
                self.add_default_link(nodes[i], nodes[j]);
            }
        }
    }
}

fn canonical_pair(a: NodeAddress, b: NodeAddress) -> (NodeAddress, NodeAddress) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Radius for about five neighbors per node in the unit square,
/// `sqrt(5 / ((n - 1) * pi))`, clamped to [0.15, 0.70].
pub(crate) fn compute_adaptive_radius(num_nodes: usize) -> f64 {
    if num_nodes <= 1 {
        return 0.5;
    }
    let n = num_nodes as f64;
    (5.0 / ((n - 1.0) * core::f64::consts::PI))
        .sqrt()
        .clamp(0.15, 0.70)
}

/// Union-find with path compression and union by rank.
struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
    components: usize,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
            components: len,
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    /// Merge the sets holding `x` and `y`; false if already merged.
    fn union(&mut self, x: usize, y: usize) -> bool {
        let (rx, ry) = (self.find(x), self.find(y));
        if rx == ry {
            return false;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            core::cmp::Ordering::Less => self.parent[rx] = ry,
            core::cmp::Ordering::Greater => self.parent[ry] = rx,
            core::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
        self.components -= 1;
        true
    }

    fn components(&self) -> usize {
        self.components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_nodes(count: u32) -> Vec<NodeAddress> {
        (0..count).map(|i| NodeAddress::new(0x0A01_0101 + i)).collect()
    }

    #[test]
    fn test_fully_connected() {
        let nodes = make_nodes(3);
        let topo = Topology::fully_connected(&nodes);
        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[0], nodes[2]));
        assert!(topo.is_connected(nodes[2], nodes[1]));
        assert_eq!(topo.link_count(), 3);
    }

    #[test]
    fn test_chain() {
        let nodes = make_nodes(4);
        let topo = Topology::chain(&nodes);
        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[0], nodes[2]));
        assert!(topo.is_fully_reachable(&nodes));
    }

    #[test]
    fn test_star() {
        let nodes = make_nodes(4);
        let topo = Topology::star(&nodes);
        assert_eq!(topo.neighbors(nodes[0]), nodes[1..].to_vec());
        assert_eq!(topo.neighbors(nodes[2]), vec![nodes[0]]);
        assert!(!topo.is_connected(nodes[1], nodes[2]));
    }

    #[test]
    fn test_grid_positions_row_first() {
        let layout = GridLayout::default();
        assert_eq!(layout.position(0), (0.0, 0.0));
        assert_eq!(layout.position(4), (20.0, 0.0));
        assert_eq!(layout.position(5), (0.0, 10.0));
        assert_eq!(layout.position(24), (20.0, 40.0));
    }

    #[test]
    fn test_grid_links_follow_range() {
        let nodes = make_nodes(25);
        let topo = Topology::grid(&nodes, GridLayout::default());

        // Same row, 20 m apart.
        assert!(topo.is_connected(nodes[0], nodes[4]));
        // Two rows down, 20 m apart.
        assert!(topo.is_connected(nodes[0], nodes[10]));
        // Three rows down, 30 m apart.
        assert!(!topo.is_connected(nodes[0], nodes[15]));
        // Opposite corners.
        assert!(!topo.is_connected(nodes[0], nodes[24]));
        assert!(topo.is_fully_reachable(&nodes));
    }

    #[test]
    fn test_partition_and_heal() {
        let nodes = make_nodes(4);
        let mut topo = Topology::fully_connected(&nodes);
        topo.partition(&[vec![nodes[0], nodes[1]], vec![nodes[2], nodes[3]]]);

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[1], nodes[2]));
        assert!(!topo.is_fully_reachable(&nodes));

        topo.heal();
        assert!(topo.is_connected(nodes[0], nodes[3]));
    }

    #[test]
    fn test_neighbors_sorted_and_active_only() {
        let nodes = make_nodes(4);
        let mut topo = Topology::fully_connected(&nodes);
        if let Some(link) = topo.get_link_mut(nodes[3], nodes[0]) {
            link.active = false;
        }
        assert_eq!(topo.neighbors(nodes[0]), vec![nodes[1], nodes[2]]);
    }

    #[test]
    fn test_default_link_template() {
        let nodes = make_nodes(2);
        let topo = Topology::new()
            .with_default_link(Link::new().with_loss_rate(0.25))
            .connect_all(&nodes);
        let link = topo.get_link(nodes[0], nodes[1]).expect("link");
        assert_eq!(link.loss_rate, 0.25);
    }

    #[test]
    fn test_global_loss_rate_clamped() {
        let nodes = make_nodes(3);
        let mut topo = Topology::chain(&nodes);
        topo.set_global_loss_rate(1.5);
        assert_eq!(topo.get_link(nodes[0], nodes[1]).map(|l| l.loss_rate), Some(1.0));
    }

    #[test]
    fn test_random_geometric_connected_and_deterministic() {
        let nodes = make_nodes(20);
        let a = Topology::random_geometric(&nodes, 42, 0.3);
        let b = Topology::random_geometric(&nodes, 42, 0.3);
        assert!(a.is_fully_reachable(&nodes));
        for &n in &nodes {
            assert_eq!(a.neighbors(n), b.neighbors(n));
        }
    }

    #[test]
    fn test_random_geometric_tiny_radius_still_connected() {
        let nodes = make_nodes(10);
        let topo = Topology::random_geometric(&nodes, 7, 0.01);
        assert!(topo.is_fully_reachable(&nodes));
        // A spanning tree at minimum.
        assert!(topo.link_count() >= nodes.len() - 1);
    }

    #[test]
    fn test_compute_adaptive_radius() {
        assert!((compute_adaptive_radius(2) - 0.70).abs() < 0.01);
        let r5 = compute_adaptive_radius(5);
        let r100 = compute_adaptive_radius(100);
        assert!((0.15..=0.70).contains(&r5));
        assert!(r100 < r5);
        assert!((compute_adaptive_radius(1000) - 0.15).abs() < 0.01);
    }
}
