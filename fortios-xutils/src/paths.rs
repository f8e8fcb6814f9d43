//! Enumerate interface paths that let traffic from one IP reach another.

use std::net::IpAddr;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::topology::{Edge, NodeId, PolicyLabel, TopologyGraph, Via};

pub const DEFAULT_MAX_HOPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOptions {
    /// Longest path, in edges, that is explored.
    pub max_hops: usize,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

/// How one hop was admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HopVia {
    /// The policies of the edge that admit the traffic.
    Policies { policies: Vec<PolicyLabel> },
    Link { network: ipnetwork::IpNetwork },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(flatten)]
    pub via: HopVia,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub hops: Vec<Hop>,
}

impl Path {
    /// Nodes visited, start first.
    pub fn nodes(&self) -> Vec<&NodeId> {
        let mut nodes: Vec<&NodeId> = self.hops.first().map(|hop| &hop.from).into_iter().collect();
        nodes.extend(self.hops.iter().map(|hop| &hop.to));
        nodes
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

/// All simple paths from an interface admitting `src` to one admitting
/// `dst`, shortest first. An empty result means no reachability.
pub fn find_paths(graph: &TopologyGraph, src: IpAddr, dst: IpAddr, options: PathOptions) -> Vec<Path> {
    let mut starts: IndexSet<&NodeId> = IndexSet::new();
    let mut ends: IndexSet<&NodeId> = IndexSet::new();
    for edge in graph.edges() {
        if edge.policies().iter().any(|label| label.srcaddrs.contains(src)) {
            starts.insert(&edge.from);
        }
        if edge.policies().iter().any(|label| label.dstaddrs.contains(dst)) {
            ends.insert(&edge.to);
        }
    }
    starts.sort_by(|a, b| graph.node_index(a).cmp(&graph.node_index(b)));
    tracing::debug!(
        %src,
        %dst,
        starts = starts.len(),
        ends = ends.len(),
        "searching paths"
    );

    let mut search = Search {
        graph,
        src,
        dst,
        ends: &ends,
        max_hops: options.max_hops,
        on_path: Vec::new(),
        hops: Vec::new(),
        found: Vec::new(),
    };
    for start in starts.iter().copied() {
        search.on_path.push(start);
        search.walk(start);
        search.on_path.pop();
    }

    let mut found = search.found;
    found.sort_by_cached_key(|path| {
        let order: Vec<usize> = path
            .nodes()
            .iter()
            .map(|id| graph.node_index(id).unwrap_or(usize::MAX))
            .collect();
        (path.len(), order)
    });
    found
}

struct Search<'g> {
    graph: &'g TopologyGraph,
    src: IpAddr,
    dst: IpAddr,
    ends: &'g IndexSet<&'g NodeId>,
    max_hops: usize,
    on_path: Vec<&'g NodeId>,
    hops: Vec<Hop>,
    found: Vec<Path>,
}

impl<'g> Search<'g> {
    fn walk(&mut self, at: &'g NodeId) {
        if self.hops.len() >= self.max_hops {
            return;
        }
        let graph = self.graph;
        for edge in graph.edges_from(at) {
            if self.on_path.contains(&&edge.to) {
                continue;
            }
            let Some(via) = self.admit(edge) else {
                continue;
            };

            self.hops.push(Hop {
                from: edge.from.clone(),
                to: edge.to.clone(),
                via,
            });
            self.on_path.push(&edge.to);

            let has_policy_hop = self
                .hops
                .iter()
                .any(|hop| matches!(hop.via, HopVia::Policies { .. }));
            if has_policy_hop && self.ends.contains(&edge.to) {
                self.found.push(Path {
                    hops: self.hops.clone(),
                });
            }
            self.walk(&edge.to);

            self.on_path.pop();
            self.hops.pop();
        }
    }

    fn admit(&self, edge: &Edge) -> Option<HopVia> {
        match &edge.via {
            Via::Link { network } => Some(HopVia::Link { network: *network }),
            Via::Policies { policies } => {
                let admitting: Vec<PolicyLabel> = policies
                    .iter()
                    .filter(|label| label.admits(self.src, self.dst))
                    .cloned()
                    .collect();
                if admitting.is_empty() {
                    None
                } else {
                    Some(HopVia::Policies {
                        policies: admitting,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::{find_paths, HopVia, PathOptions};
    use crate::address::PrefixSet;
    use crate::netutils::parse_prefix;
    use crate::topology::{Node, NodeId, PolicyLabel, TopologyGraph};

    fn ip(text: &str) -> IpAddr {
        text.parse().expect("ip")
    }

    fn prefixes(texts: &[&str]) -> PrefixSet {
        texts.iter().map(|t| parse_prefix(t).expect("prefix")).collect()
    }

    fn node(device: &str, interface: &str, network: Option<&str>) -> Node {
        let network = network.map(|n| parse_prefix(n).expect("network"));
        Node {
            id: NodeId::new(device, interface),
            vdom: None,
            address: network,
            network,
            status: None,
        }
    }

    fn label(device: &str, id: &str, src: &[&str], dst: &[&str]) -> PolicyLabel {
        PolicyLabel {
            device: device.to_string(),
            vdom: None,
            policy_id: id.to_string(),
            name: None,
            srcaddrs: prefixes(src),
            dstaddrs: prefixes(dst),
        }
    }

    /// lan(a) -> wan(a) == link == wan(b) -> dmz(b)
    fn two_devices() -> TopologyGraph {
        let mut a = TopologyGraph::default();
        a.add_node(node("a", "lan", Some("192.168.1.0/24")));
        a.add_node(node("a", "wan", Some("10.0.0.0/30")));
        a.add_policy(
            NodeId::new("a", "lan"),
            NodeId::new("a", "wan"),
            label("a", "1", &["192.168.1.0/24"], &["172.16.0.0/16"]),
        );

        let mut b = TopologyGraph::default();
        b.add_node(node("b", "wan", Some("10.0.0.0/30")));
        b.add_node(node("b", "dmz", Some("172.16.0.0/24")));
        b.add_policy(
            NodeId::new("b", "wan"),
            NodeId::new("b", "dmz"),
            label("b", "7", &["192.168.0.0/16"], &["172.16.0.10/32"]),
        );
        b.add_policy(
            NodeId::new("b", "wan"),
            NodeId::new("b", "dmz"),
            label("b", "8", &["10.9.9.0/24"], &["172.16.0.0/24"]),
        );
        TopologyGraph::compose([&a, &b])
    }

    fn nodes_of(path: &super::Path) -> Vec<String> {
        path.nodes().iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn crosses_devices_over_links() {
        let graph = two_devices();
        let paths = find_paths(
            &graph,
            ip("192.168.1.20"),
            ip("172.16.0.10"),
            PathOptions::default(),
        );
        let lengths: Vec<usize> = paths.iter().map(|p| p.len()).collect();
        assert_eq!(lengths, vec![1, 1, 3]);
        assert_eq!(nodes_of(&paths[0]), vec!["a/lan", "a/wan"]);
        assert_eq!(nodes_of(&paths[1]), vec!["b/wan", "b/dmz"]);
        assert_eq!(nodes_of(&paths[2]), vec!["a/lan", "a/wan", "b/wan", "b/dmz"]);

        assert!(matches!(paths[2].hops[1].via, HopVia::Link { .. }));
        match &paths[2].hops[2].via {
            HopVia::Policies { policies } => {
                assert_eq!(policies.len(), 1);
                assert_eq!(policies[0].policy_id, "7");
            }
            other => panic!("expected policy hop, got {other:?}"),
        }
    }

    #[test]
    fn destination_outside_policies_is_unreachable() {
        let graph = two_devices();
        let paths = find_paths(
            &graph,
            ip("192.168.1.20"),
            ip("172.17.0.1"),
            PathOptions::default(),
        );
        assert!(paths.is_empty());
    }

    #[test]
    fn max_hops_bounds_the_search() {
        let graph = two_devices();
        let paths = find_paths(
            &graph,
            ip("192.168.1.20"),
            ip("172.16.0.10"),
            PathOptions { max_hops: 2 },
        );
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.len() <= 2));
    }

    #[test]
    fn ties_follow_node_insertion_order() {
        let mut graph = two_devices();
        graph.add_policy(
            NodeId::new("a", "lan"),
            NodeId::new("b", "dmz"),
            label("a", "2", &["192.168.1.0/24"], &["172.16.0.0/24"]),
        );
        let paths = find_paths(
            &graph,
            ip("192.168.1.20"),
            ip("172.16.0.10"),
            PathOptions::default(),
        );
        let lengths: Vec<usize> = paths.iter().map(|p| p.len()).collect();
        assert_eq!(lengths, vec![1, 1, 1, 3]);
        assert_eq!(nodes_of(&paths[0]), vec!["a/lan", "a/wan"]);
        assert_eq!(nodes_of(&paths[1]), vec!["a/lan", "b/dmz"]);
        assert_eq!(nodes_of(&paths[2]), vec!["b/wan", "b/dmz"]);
    }
}
