//! Directed graph of device interfaces connected by firewall policies.
//!
//! Nodes are `(device, interface)` pairs taken from `system interface`.
//! A policy edge `a -> b` carries every enabled accept policy whose
//! `srcintf`/`dstintf` cover `a`/`b` (zones expand to their members). Link
//! edges join interfaces of different devices configured on the same
//! network.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

use config_block_core::{FieldValue, Record};
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::PrefixSet;
use crate::dataset::Dataset;
use crate::netutils;
use crate::policy::{PolicyRecord, PolicySet};
use crate::snapshot::{self, SnapshotError, SnapshotKind};

pub const INTERFACE_SECTION: &str = "system interface";
pub const ZONE_SECTION: &str = "system zone";

#[derive(Debug, Error)]
pub enum GraphLoadError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path} is not a topology graph: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// `(device, interface)` identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub device: String,
    pub interface: String,
}

impl NodeId {
    pub fn new(device: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.interface)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vdom: Option<String>,
    /// Interface address with its prefix length, e.g. `192.168.1.99/24`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpNetwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<IpNetwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Node {
    fn from_interface(device: &str, record: &Record) -> Self {
        let address = match record.values("ip").as_slice() {
            [addr, mask] => match netutils::interface_address(addr, mask) {
                Ok(address) => address,
                Err(err) => {
                    tracing::warn!(device, interface = %record.edit, "ignoring interface ip: {err}");
                    None
                }
            },
            _ => None,
        };
        Self {
            id: NodeId::new(device, record.edit.clone()),
            vdom: record.text("vdom").map(ToOwned::to_owned),
            network: address.as_ref().map(netutils::network_of),
            address,
            status: record.text("status").map(ToOwned::to_owned),
        }
    }

    fn sort_key(&self) -> (Option<&str>, Option<String>, Option<&str>) {
        (
            self.vdom.as_deref(),
            self.address.map(|a| a.to_string()),
            self.status.as_deref(),
        )
    }
}

/// One policy permitting traffic along an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLabel {
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vdom: Option<String>,
    pub policy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub srcaddrs: PrefixSet,
    pub dstaddrs: PrefixSet,
}

impl PolicyLabel {
    fn new(device: &str, policy: &PolicyRecord) -> Self {
        Self {
            device: device.to_string(),
            vdom: policy.vdom.clone(),
            policy_id: policy.id().to_string(),
            name: policy.name().map(ToOwned::to_owned),
            srcaddrs: policy.srcaddrs.clone(),
            dstaddrs: policy.dstaddrs.clone(),
        }
    }

    pub fn admits(&self, src: IpAddr, dst: IpAddr) -> bool {
        self.srcaddrs.contains(src) && self.dstaddrs.contains(dst)
    }

    /// Total order used to keep edge labels canonical.
    fn canonical_key(&self) -> (&str, Option<&str>, u64, &str, Option<&str>, String, String) {
        (
            &self.device,
            self.vdom.as_deref(),
            self.policy_id.parse().unwrap_or(u64::MAX),
            &self.policy_id,
            self.name.as_deref(),
            self.srcaddrs.to_string(),
            self.dstaddrs.to_string(),
        )
    }
}

/// What connects the two ends of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Via {
    Policies { policies: Vec<PolicyLabel> },
    Link { network: IpNetwork },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(flatten)]
    pub via: Via,
}

impl Edge {
    pub fn is_link(&self) -> bool {
        matches!(self.via, Via::Link { .. })
    }

    /// Policy labels of a policy edge; empty for links.
    pub fn policies(&self) -> &[PolicyLabel] {
        match &self.via {
            Via::Policies { policies } => policies,
            Via::Link { .. } => &[],
        }
    }
}

/// Counters reported while building a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub interfaces: usize,
    pub policy_edges: usize,
    /// Policies that are disabled or do not accept.
    pub inactive_policies: usize,
    /// Interface names in policies that match no interface or zone.
    pub unknown_interfaces: usize,
}

/// Interface graph of one or more devices.
///
/// Equality ignores the insertion order of nodes and edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphRepr", into = "GraphRepr")]
pub struct TopologyGraph {
    nodes: IndexMap<NodeId, Node>,
    edges: IndexMap<(NodeId, NodeId), Edge>,
}

#[derive(Serialize, Deserialize)]
struct GraphRepr {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl From<GraphRepr> for TopologyGraph {
    fn from(repr: GraphRepr) -> Self {
        let mut graph = TopologyGraph::default();
        for node in repr.nodes {
            graph.nodes.insert(node.id.clone(), node);
        }
        for edge in repr.edges {
            graph.edges.insert((edge.from.clone(), edge.to.clone()), edge);
        }
        graph
    }
}

impl From<TopologyGraph> for GraphRepr {
    fn from(graph: TopologyGraph) -> Self {
        GraphRepr {
            nodes: graph.nodes.into_values().collect(),
            edges: graph.edges.into_values().collect(),
        }
    }
}

impl PartialEq for TopologyGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.edges.len() == other.edges.len()
            && self
                .nodes
                .iter()
                .all(|(id, node)| other.nodes.get(id) == Some(node))
            && self
                .edges
                .iter()
                .all(|(key, edge)| other.edges.get(key) == Some(edge))
    }
}

impl Eq for TopologyGraph {}

impl TopologyGraph {
    /// Build the graph of one device from its dataset and resolved policies.
    pub fn build(dataset: &Dataset, policies: &PolicySet) -> (Self, BuildStats) {
        let device = policies.device.as_str();
        let mut graph = TopologyGraph::default();
        let mut stats = BuildStats::default();

        for section in dataset.sections_named(INTERFACE_SECTION) {
            for record in section.records() {
                let mut node = Node::from_interface(device, record);
                if node.vdom.is_none() {
                    node.vdom = section.vdom.clone();
                }
                graph.add_node(node);
            }
        }
        stats.interfaces = graph.nodes.len();

        let zones = Zones::from_dataset(dataset);
        for policy in &policies.policies {
            if !policy.accepts() {
                stats.inactive_policies += 1;
                continue;
            }
            let vdom = policy.vdom.as_deref();
            let sources = graph.expand(device, vdom, &policy.srcintf(), &zones, &mut stats);
            let targets = graph.expand(device, vdom, &policy.dstintf(), &zones, &mut stats);
            let label = PolicyLabel::new(device, policy);
            for from in &sources {
                for to in &targets {
                    graph.add_policy(from.clone(), to.clone(), label.clone());
                }
            }
        }
        stats.policy_edges = graph.edges.values().filter(|e| !e.is_link()).count();

        if stats.unknown_interfaces > 0 {
            tracing::warn!(
                device,
                count = stats.unknown_interfaces,
                "policy interfaces not found in `system interface` or `system zone`"
            );
        }
        tracing::info!(
            device,
            nodes = graph.nodes.len(),
            edges = stats.policy_edges,
            "built topology graph"
        );
        (graph, stats)
    }

    /// Merge independently built graphs. Policy labels of shared edges are
    /// united and link edges re-derived.
    pub fn compose<'a, I>(graphs: I) -> Self
    where
        I: IntoIterator<Item = &'a TopologyGraph>,
    {
        let mut out = TopologyGraph::default();
        for graph in graphs {
            for node in graph.nodes.values() {
                out.add_node(node.clone());
            }
            for edge in graph.edges.values() {
                if let Via::Policies { policies } = &edge.via {
                    for label in policies {
                        out.add_policy(edge.from.clone(), edge.to.clone(), label.clone());
                    }
                }
            }
        }
        out.derive_links();
        out
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.values()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Insertion position of a node; used to order equal-length paths.
    pub fn node_index(&self, id: &NodeId) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    pub fn edge(&self, from: &NodeId, to: &NodeId) -> Option<&Edge> {
        self.edges.get(&(from.clone(), to.clone()))
    }

    /// Outgoing edges of `id` in insertion order.
    pub fn edges_from<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |edge| &edge.from == id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Add a node; an existing node with the same id is kept unless the new
    /// one sorts first, so merging is independent of input order.
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                if node.sort_key() < existing.sort_key() {
                    *existing = node;
                }
            }
            None => {
                self.nodes.insert(node.id.clone(), node);
            }
        }
    }

    /// Add `label` to the policy edge `from -> to`, creating it if needed.
    pub fn add_policy(&mut self, from: NodeId, to: NodeId, label: PolicyLabel) {
        let edge = self
            .edges
            .entry((from.clone(), to.clone()))
            .or_insert_with(|| Edge {
                from,
                to,
                via: Via::Policies {
                    policies: Vec::new(),
                },
            });
        if let Via::Policies { policies } = &mut edge.via {
            if !policies.contains(&label) {
                policies.push(label);
                policies.sort_by(|a, b| a.canonical_key().cmp(&b.canonical_key()));
            }
        }
    }

    /// Replace all link edges with the ones implied by the current nodes.
    pub fn derive_links(&mut self) {
        self.edges.retain(|_, edge| !edge.is_link());

        let mut by_network: IndexMap<IpNetwork, Vec<NodeId>> = IndexMap::new();
        for node in self.nodes.values() {
            if let Some(network) = node.network {
                by_network.entry(network).or_default().push(node.id.clone());
            }
        }

        for (network, members) in by_network {
            for from in &members {
                for to in &members {
                    if from.device == to.device {
                        continue;
                    }
                    self.edges.insert(
                        (from.clone(), to.clone()),
                        Edge {
                            from: from.clone(),
                            to: to.clone(),
                            via: Via::Link { network },
                        },
                    );
                }
            }
        }
    }

    fn expand(
        &self,
        device: &str,
        vdom: Option<&str>,
        names: &[&str],
        zones: &Zones,
        stats: &mut BuildStats,
    ) -> Vec<NodeId> {
        let mut out = Vec::new();
        for name in names {
            let id = NodeId::new(device, *name);
            if self.nodes.contains_key(&id) {
                out.push(id);
                continue;
            }
            match zones.members(vdom, name) {
                Some(members) => out.extend(
                    members
                        .iter()
                        .map(|member| NodeId::new(device, member.clone()))
                        .filter(|member| self.nodes.contains_key(member)),
                ),
                None => {
                    tracing::debug!(device, interface = %name, "skipping unknown interface");
                    stats.unknown_interfaces += 1;
                }
            }
        }
        out
    }

    /// Load a graph from a snapshot (`*.gz`) or plain JSON.
    pub fn load(path: &Path) -> Result<Self, GraphLoadError> {
        if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
            return Ok(snapshot::load(path, SnapshotKind::Graph)?);
        }
        let raw = fs::read_to_string(path).map_err(|source| GraphLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| GraphLoadError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    /// Save as a snapshot (`*.gz`) or as plain JSON.
    pub fn save(&self, path: &Path) -> Result<(), GraphLoadError> {
        if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
            snapshot::save(path, SnapshotKind::Graph, self)?;
            return Ok(());
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| GraphLoadError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, text).map_err(|source| GraphLoadError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// `system zone` members keyed by (vdom, zone name).
struct Zones {
    members: HashMap<(Option<String>, String), Vec<String>>,
}

impl Zones {
    fn from_dataset(dataset: &Dataset) -> Self {
        let mut members = HashMap::new();
        for section in dataset.sections_named(ZONE_SECTION) {
            for record in section.records() {
                let interfaces: Vec<String> = match record.get("interface") {
                    Some(FieldValue::Table(rows)) => {
                        rows.iter().map(|row| row.edit.clone()).collect()
                    }
                    _ => record.values("interface").into_iter().map(str::to_string).collect(),
                };
                members.insert((section.vdom.clone(), record.edit.clone()), interfaces);
            }
        }
        Self { members }
    }

    fn members(&self, vdom: Option<&str>, name: &str) -> Option<&Vec<String>> {
        self.members
            .get(&(vdom.map(ToOwned::to_owned), name.to_string()))
            .or_else(|| self.members.get(&(None, name.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use config_block_core::parse;

    use super::{NodeId, TopologyGraph, Via};
    use crate::address::ResolveOptions;
    use crate::dataset::Dataset;
    use crate::policy::PolicySet;

    fn device(hostname: &str, lan: &str, policy_name: &str) -> TopologyGraph {
        let text = format!(
            r#"
config system global
    set hostname "{hostname}"
end
config system interface
    edit "port1"
        set vdom "root"
        set ip {lan} 255.255.255.0
    next
    edit "port2"
        set vdom "root"
        set ip 10.10.10.1 255.255.255.0
    next
    edit "port3"
        set vdom "root"
    next
end
config system zone
    edit "inside"
        set interface "port1" "port3"
    next
end
config firewall policy
    edit 1
        set name "{policy_name}"
        set srcintf "inside"
        set dstintf "port2"
        set srcaddr "all"
        set dstaddr "all"
        set action accept
    next
    edit 2
        set srcintf "port1"
        set dstintf "port2"
        set srcaddr "all"
        set dstaddr "all"
        set action accept
    next
    edit 3
        set srcintf "any"
        set dstintf "port2"
        set srcaddr "all"
        set dstaddr "all"
        set action accept
    next
    edit 4
        set srcintf "port2"
        set dstintf "port1"
        set srcaddr "all"
        set dstaddr "all"
    next
end
"#
        );
        let doc = parse(&text).expect("parse");
        let dataset = Dataset::from_document(&doc, "test.conf");
        let policies = PolicySet::from_dataset(&dataset, ResolveOptions::default());
        let (graph, stats) = TopologyGraph::build(&dataset, &policies);
        assert_eq!(stats.unknown_interfaces, 1);
        assert_eq!(stats.inactive_policies, 1);
        graph
    }

    #[test]
    fn zones_expand_and_labels_accumulate() {
        let graph = device("fw-a", "192.168.1.1", "inside-out");
        assert_eq!(graph.node_count(), 3);

        let port1 = NodeId::new("fw-a", "port1");
        let port2 = NodeId::new("fw-a", "port2");
        let port3 = NodeId::new("fw-a", "port3");
        let edge = graph.edge(&port1, &port2).expect("port1 -> port2");
        let ids: Vec<&str> = edge.policies().iter().map(|l| l.policy_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(graph.edge(&port3, &port2).is_some());
        assert!(graph.edge(&port2, &port1).is_none());
    }

    #[test]
    fn compose_adds_links_on_shared_networks() {
        let a = device("fw-a", "192.168.1.1", "a");
        let b = device("fw-b", "192.168.1.2", "b");
        let composed = TopologyGraph::compose([&a, &b]);

        let a_wan = NodeId::new("fw-a", "port2");
        let b_wan = NodeId::new("fw-b", "port2");
        match composed.edge(&a_wan, &b_wan).map(|e| &e.via) {
            Some(Via::Link { network }) => assert_eq!(network.to_string(), "10.10.10.0/24"),
            other => panic!("expected link edge, got {other:?}"),
        }
        assert!(composed.edge(&b_wan, &a_wan).is_some());
        assert!(composed
            .edge(&NodeId::new("fw-a", "port1"), &NodeId::new("fw-b", "port1"))
            .is_some());
    }

    #[test]
    fn compose_is_commutative_and_associative() {
        let a = device("fw-a", "192.168.1.1", "a");
        let b = device("fw-b", "192.168.2.1", "b");
        let c = device("fw-c", "192.168.3.1", "c");

        assert_eq!(
            TopologyGraph::compose([&a, &b]),
            TopologyGraph::compose([&b, &a])
        );
        let ab = TopologyGraph::compose([&a, &b]);
        let bc = TopologyGraph::compose([&b, &c]);
        assert_eq!(
            TopologyGraph::compose([&ab, &c]),
            TopologyGraph::compose([&a, &bc])
        );
    }

    #[test]
    fn compose_unions_labels_of_shared_edges() {
        let one = device("fw-a", "192.168.1.1", "first");
        let two = device("fw-a", "192.168.1.1", "second");
        let merged = TopologyGraph::compose([&one, &two]);
        let edge = merged
            .edge(&NodeId::new("fw-a", "port1"), &NodeId::new("fw-a", "port2"))
            .expect("edge");
        assert_eq!(edge.policies().len(), 3);
    }

    #[test]
    fn json_round_trip_is_equal() {
        let graph = TopologyGraph::compose([
            &device("fw-a", "192.168.1.1", "a"),
            &device("fw-b", "192.168.1.2", "b"),
        ]);
        let json = serde_json::to_string(&graph).expect("serialize");
        let back: TopologyGraph = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, graph);
    }
}
