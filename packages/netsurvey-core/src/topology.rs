//! IP-adjacency topology.
//!
//! Two interfaces are directly connected when their addresses fall in the
//! same IPv4 subnet. The graph is rebuilt from interface inventories on
//! every request and is identical for identical input.

use crate::batch::BatchResult;
use crate::interfaces::{InterfaceInventory, InterfaceRecord, is_loopback_interface};
use ipnetwork::Ipv4Network;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 subnet normalized to its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubnetKey {
    network: Ipv4Addr,
    prefix: u8,
}

impl SubnetKey {
    /// Subnet containing `ip`/`prefix`, or `None` for an invalid prefix.
    pub fn new(ip: Ipv4Addr, prefix: u8) -> Option<Self> {
        let net = Ipv4Network::new(ip, prefix).ok()?;
        Some(Self {
            network: net.network(),
            prefix: net.prefix(),
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl fmt::Display for SubnetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for SubnetKey {
    type Err = ipnetwork::IpNetworkError;

    /// Accepts any address inside the subnet ("10.0.0.1/30" == "10.0.0.0/30").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Network = s.trim().parse()?;
        Ok(Self {
            network: net.network(),
            prefix: net.prefix(),
        })
    }
}

impl Serialize for SubnetKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeAttributes {
    pub network: SubnetKey,
    pub local_interface: String,
    pub remote_interface: String,
    pub local_ip: Ipv4Addr,
    pub remote_ip: Ipv4Addr,
}

/// A direct connection. `source` is the device whose interface is "local".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub attributes: EdgeAttributes,
}

impl Edge {
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    /// The device on the other end, if `device` is an endpoint.
    pub fn peer_of(&self, device: &str) -> Option<&str> {
        if self.source == device {
            Some(&self.target)
        } else if self.target == device {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// A device adjacent to the one asked about, and the link between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbor<'a> {
    pub neighbor: &'a str,
    pub attributes: &'a EdgeAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyGraph {
    /// Device names in inventory order
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
}

impl Serialize for TopologyGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TopologyGraph", 1)?;
        state.serialize_field("direct_connections", &self.edges)?;
        state.end()
    }
}

impl TopologyGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, device: &str) -> bool {
        self.nodes.iter().any(|n| n == device)
    }

    /// Fewer edges than nodes means some devices could not be linked.
    pub fn is_sparse(&self) -> bool {
        self.edge_count() < self.node_count()
    }

    /// Devices directly connected to `device`, one entry per edge, in edge
    /// order.
    pub fn neighbors(&self, device: &str) -> Vec<Neighbor<'_>> {
        let adjacency = self.adjacency();
        let Some(&index) = adjacency.index.get(device) else {
            return Vec::new();
        };

        let mut incident: Vec<usize> = adjacency.graph.edges(index).map(|e| *e.weight()).collect();
        incident.sort_unstable();
        incident.dedup();

        incident
            .into_iter()
            .filter_map(|i| {
                let edge = &self.edges[i];
                edge.peer_of(device).map(|peer| Neighbor {
                    neighbor: peer,
                    attributes: &edge.attributes,
                })
            })
            .collect()
    }

    /// Fewest-hop device path from `from` to `to`, endpoints included.
    ///
    /// Equal-length paths are broken by walking back from `to` through the
    /// lowest-named predecessor, so the same graph always yields the same
    /// path. `None` when either device is absent or unreachable.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }

        let adjacency = self.adjacency();
        let start = *adjacency.index.get(from)?;
        let goal = *adjacency.index.get(to)?;
        let graph = &adjacency.graph;

        let hops = dijkstra(graph, start, None, |_| 1usize);
        let mut remaining = *hops.get(&goal)?;

        let mut path = vec![goal];
        let mut current = goal;
        while current != start {
            remaining = remaining.checked_sub(1)?;
            current = graph
                .neighbors(current)
                .filter(|n| hops.get(n) == Some(&remaining))
                .min_by_key(|n| graph[*n])?;
            path.push(current);
        }

        path.reverse();
        Some(path.into_iter().map(|n| graph[n].to_string()).collect())
    }

    /// Devices with an interface in `network`, sorted by name.
    pub fn segment(&self, network: &SubnetKey) -> Vec<&str> {
        let mut devices: Vec<&str> = self
            .edges
            .iter()
            .filter(|e| e.attributes.network == *network)
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .collect();
        devices.sort_unstable();
        devices.dedup();
        devices
    }
}

/// Undirected petgraph view of a [`TopologyGraph`]. Edge weights index
/// `TopologyGraph::edges`, so parallel links and self-loops are kept.
struct Adjacency<'a> {
    graph: UnGraph<&'a str, usize>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> Adjacency<'a> {
    fn node(&mut self, name: &'a str) -> NodeIndex {
        let graph = &mut self.graph;
        *self.index.entry(name).or_insert_with(|| graph.add_node(name))
    }
}

impl TopologyGraph {
    fn adjacency(&self) -> Adjacency<'_> {
        let mut adjacency = Adjacency {
            graph: UnGraph::with_capacity(self.nodes.len(), self.edges.len()),
            index: HashMap::with_capacity(self.nodes.len()),
        };
        for node in &self.nodes {
            adjacency.node(node);
        }
        for (i, edge) in self.edges.iter().enumerate() {
            let source = adjacency.node(&edge.source);
            let target = adjacency.node(&edge.target);
            adjacency.graph.add_edge(source, target, i);
        }
        adjacency
    }
}

/// An interface usable for adjacency: addressed and not a management port.
struct Endpoint<'a> {
    device: &'a str,
    interface: &'a str,
    ip: Ipv4Addr,
}

/// Build the topology from the inventories of devices that answered.
pub fn build_topology(inventories: &[InterfaceInventory]) -> TopologyGraph {
    let mut nodes: Vec<String> = Vec::with_capacity(inventories.len());
    for inventory in inventories {
        if !nodes.contains(&inventory.device) {
            nodes.push(inventory.device.clone());
        }
    }

    let mut subnets: BTreeMap<SubnetKey, Vec<Endpoint<'_>>> = BTreeMap::new();
    for inventory in inventories {
        for record in &inventory.interfaces {
            if let Some((key, endpoint)) = endpoint(&inventory.device, record) {
                subnets.entry(key).or_default().push(endpoint);
            }
        }
    }

    let mut edges = Vec::new();
    for (network, mut members) in subnets {
        members.sort_by(|a, b| (a.device, a.interface).cmp(&(b.device, b.interface)));
        members.dedup_by(|a, b| a.device == b.device && a.interface == b.interface);

        for (i, local) in members.iter().enumerate() {
            for remote in &members[i + 1..] {
                if local.device == remote.device
                    && !is_loopback_interface(local.interface)
                    && !is_loopback_interface(remote.interface)
                {
                    continue;
                }
                edges.push(Edge {
                    source: local.device.to_string(),
                    target: remote.device.to_string(),
                    attributes: EdgeAttributes {
                        network,
                        local_interface: local.interface.to_string(),
                        remote_interface: remote.interface.to_string(),
                        local_ip: local.ip,
                        remote_ip: remote.ip,
                    },
                });
            }
        }
    }

    let graph = TopologyGraph { nodes, edges };
    tracing::info!(
        "Built topology with {} devices and {} connections",
        graph.node_count(),
        graph.edge_count()
    );
    if graph.is_sparse() {
        tracing::warn!(
            "Sparse topology: {} connections for {} devices - some devices may be missing interface data",
            graph.edge_count(),
            graph.node_count()
        );
    }
    graph
}

/// Build the topology from a batch interface collection; failed devices are
/// left out of the graph.
pub fn build_from_batch(batch: &BatchResult<InterfaceInventory>) -> TopologyGraph {
    let missing = batch.results.iter().filter(|r| !r.is_success()).count();
    if missing > 0 {
        tracing::warn!(
            "{} of {} devices returned no interface data and are absent from the topology",
            missing,
            batch.results.len()
        );
    }

    let inventories: Vec<InterfaceInventory> =
        batch.successes().map(|(_, inventory)| inventory.clone()).collect();
    build_topology(&inventories)
}

fn endpoint<'a>(
    device: &'a str,
    record: &'a InterfaceRecord,
) -> Option<(SubnetKey, Endpoint<'a>)> {
    if record.is_management {
        return None;
    }
    let ip = record.ip_address?;
    let key = SubnetKey::new(ip, record.prefix_length?)?;
    Some((
        key,
        Endpoint {
            device,
            interface: &record.name,
            ip,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::CollectionMode;

    fn record(device: &str, name: &str, ip: &str, prefix: u8) -> InterfaceRecord {
        InterfaceRecord {
            device: device.to_string(),
            name: name.to_string(),
            admin_state: Some("UP".to_string()),
            oper_state: Some("UP".to_string()),
            ip_address: ip.parse().ok(),
            prefix_length: Some(prefix),
            vrf: None,
            description: None,
            is_management: crate::interfaces::is_management_interface(name),
            details: None,
            status: None,
        }
    }

    fn inventory(device: &str, interfaces: Vec<InterfaceRecord>) -> InterfaceInventory {
        InterfaceInventory {
            device: device.to_string(),
            mode: CollectionMode::Brief,
            interfaces,
            summary: None,
        }
    }

    fn lab() -> Vec<InterfaceInventory> {
        vec![
            inventory(
                "xrd-2",
                vec![
                    record("xrd-2", "GigabitEthernet0/0/0/0", "10.0.0.2", 30),
                    record("xrd-2", "GigabitEthernet0/0/0/1", "10.0.0.5", 30),
                    record("xrd-2", "MgmtEth0/RP0/CPU0/0", "192.168.0.12", 24),
                ],
            ),
            inventory(
                "xrd-1",
                vec![
                    record("xrd-1", "GigabitEthernet0/0/0/0", "10.0.0.1", 30),
                    record("xrd-1", "MgmtEth0/RP0/CPU0/0", "192.168.0.11", 24),
                ],
            ),
            inventory(
                "xrd-3",
                vec![record("xrd-3", "GigabitEthernet0/0/0/0", "10.0.0.6", 30)],
            ),
        ]
    }

    #[test]
    fn test_subnet_key_normalizes() {
        let a = SubnetKey::new("10.0.0.1".parse().unwrap(), 30).unwrap();
        let b: SubnetKey = "10.0.0.2/30".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "10.0.0.0/30");
        assert!(SubnetKey::new(Ipv4Addr::LOCALHOST, 33).is_none());
    }

    #[test]
    fn test_single_link_yields_one_edge() {
        let graph = build_topology(&lab()[..2]);

        assert_eq!(graph.edge_count(), 1);
        let edge = &graph.edges[0];
        assert_eq!(edge.source, "xrd-1");
        assert_eq!(edge.target, "xrd-2");
        assert_eq!(edge.attributes.network.to_string(), "10.0.0.0/30");
        assert_eq!(edge.attributes.local_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(edge.attributes.remote_ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_build_is_deterministic() {
        let mut reversed = lab();
        reversed.reverse();

        let first = serde_json::to_string(&build_topology(&lab())).unwrap();
        let second = serde_json::to_string(&build_topology(&lab())).unwrap();
        let third = serde_json::to_string(&build_topology(&reversed)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_management_interfaces_never_linked() {
        let graph = build_topology(&lab());
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.edges.iter().all(|e| {
            !e.attributes.local_interface.starts_with("Mgmt")
                && !e.attributes.remote_interface.starts_with("Mgmt")
        }));
        assert!(graph.segment(&"192.168.0.0/24".parse().unwrap()).is_empty());
    }

    #[test]
    fn test_same_device_pairs_need_loopback() {
        let graph = build_topology(&[inventory(
            "xrd-1",
            vec![
                record("xrd-1", "GigabitEthernet0/0/0/0", "10.1.1.1", 24),
                record("xrd-1", "GigabitEthernet0/0/0/1", "10.1.1.2", 24),
                record("xrd-1", "Loopback0", "10.2.2.1", 24),
                record("xrd-1", "GigabitEthernet0/0/0/2", "10.2.2.2", 24),
            ],
        )]);

        assert_eq!(graph.edge_count(), 1);
        assert!(graph.edges[0].is_self_loop());
        assert_eq!(graph.edges[0].attributes.network.to_string(), "10.2.2.0/24");
    }

    #[test]
    fn test_devices_without_links_are_still_nodes() {
        let graph = build_topology(&[
            inventory("lonely", vec![record("lonely", "Gi0/0", "172.16.0.1", 24)]),
            inventory("empty", vec![]),
        ]);
        assert_eq!(graph.nodes, vec!["lonely", "empty"]);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.is_sparse());
    }

    #[test]
    fn test_graph_queries() {
        let graph = build_topology(&lab());

        let neighbors = graph.neighbors("xrd-2");
        let names: Vec<_> = neighbors.iter().map(|n| n.neighbor).collect();
        assert_eq!(names, vec!["xrd-1", "xrd-3"]);

        assert_eq!(
            graph.shortest_path("xrd-1", "xrd-3"),
            Some(vec!["xrd-1".to_string(), "xrd-2".to_string(), "xrd-3".to_string()])
        );
        assert_eq!(graph.shortest_path("xrd-1", "nowhere"), None);

        let segment = graph.segment(&"10.0.0.4/30".parse().unwrap());
        assert_eq!(segment, vec!["xrd-2", "xrd-3"]);
    }

    #[test]
    fn test_parallel_links_are_separate_neighbors() {
        let graph = build_topology(&[
            inventory(
                "pe-1",
                vec![
                    record("pe-1", "Gi0/0", "10.1.0.1", 31),
                    record("pe-1", "Gi0/1", "10.1.0.3", 31),
                    record("pe-1", "Loopback0", "10.9.9.1", 24),
                    record("pe-1", "Gi0/9", "10.9.9.2", 24),
                ],
            ),
            inventory(
                "p-1",
                vec![
                    record("p-1", "Gi0/0", "10.1.0.0", 31),
                    record("p-1", "Gi0/1", "10.1.0.2", 31),
                ],
            ),
        ]);

        let neighbors = graph.neighbors("pe-1");
        let links: Vec<_> = neighbors
            .iter()
            .map(|n| (n.neighbor, n.attributes.network.to_string()))
            .collect();
        assert_eq!(
            links,
            vec![
                ("p-1", "10.1.0.0/31".to_string()),
                ("p-1", "10.1.0.2/31".to_string()),
                ("pe-1", "10.9.9.0/24".to_string()),
            ]
        );
        assert_eq!(graph.neighbors("p-1").len(), 2);
        assert!(graph.neighbors("nowhere").is_empty());
    }

    #[test]
    fn test_shortest_path_tie_break_is_stable() {
        // Square: a-b, a-c, b-d, c-d. Both a-b-d and a-c-d are two hops.
        let graph = build_topology(&[
            inventory(
                "a",
                vec![record("a", "e0", "10.0.1.1", 30), record("a", "e1", "10.0.2.1", 30)],
            ),
            inventory(
                "c",
                vec![record("c", "e0", "10.0.2.2", 30), record("c", "e1", "10.0.4.1", 30)],
            ),
            inventory(
                "b",
                vec![record("b", "e0", "10.0.1.2", 30), record("b", "e1", "10.0.3.1", 30)],
            ),
            inventory(
                "d",
                vec![record("d", "e0", "10.0.3.2", 30), record("d", "e1", "10.0.4.2", 30)],
            ),
            inventory("island", vec![]),
        ]);

        let expected = Some(vec!["a".to_string(), "b".to_string(), "d".to_string()]);
        for _ in 0..5 {
            assert_eq!(graph.shortest_path("a", "d"), expected);
        }
        assert_eq!(graph.shortest_path("d", "d"), Some(vec!["d".to_string()]));
        assert_eq!(graph.shortest_path("a", "island"), None);
    }

    #[test]
    fn test_serializes_as_direct_connections() {
        let graph = build_topology(&lab()[..2]);
        let value = serde_json::to_value(&graph).unwrap();

        let connections = value["direct_connections"].as_array().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0]["source"], "xrd-1");
        assert_eq!(connections[0]["attributes"]["network"], "10.0.0.0/30");
        assert_eq!(connections[0]["attributes"]["local_interface"], "GigabitEthernet0/0/0/0");
    }
}
