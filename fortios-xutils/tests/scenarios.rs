use std::net::IpAddr;
use std::path::PathBuf;

use fortios_xutils::address::{RangeExpansion, ResolveOptions};
use fortios_xutils::dataset::Dataset;
use fortios_xutils::paths::{find_paths, PathOptions};
use fortios_xutils::policy::{addresses_matching, PolicySet};
use fortios_xutils::topology::TopologyGraph;
use pretty_assertions::assert_eq;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

fn ip(text: &str) -> IpAddr {
    text.parse().expect("ip")
}

fn policies(path: &str, range_expansion: RangeExpansion) -> PolicySet {
    let dataset = Dataset::load(&fixture(path)).expect("dataset");
    PolicySet::from_dataset(
        &dataset,
        ResolveOptions {
            range_expansion,
            ..ResolveOptions::default()
        },
    )
}

fn matching_ids(set: &PolicySet, addr: &str) -> Vec<String> {
    set.policies_matching(ip(addr))
        .iter()
        .map(|policy| policy.id().to_string())
        .collect()
}

#[test]
fn host_and_range_sources_expand_per_host() {
    let set = policies("fixtures/fortigate-01.txt", RangeExpansion::Hosts);
    let policy = &set.policies[0];
    assert_eq!(policy.id(), "10");

    let mut expected = vec!["192.168.122.1/32".to_string()];
    expected.extend((1..=10).map(|host| format!("192.168.2.{host}/32")));
    expected.sort();
    assert_eq!(policy.srcaddrs.to_strings(), expected);
    assert_eq!(policy.srcaddrs.len(), 11);
    assert_eq!(policy.dstaddrs.to_strings(), vec!["192.168.3.1/32"]);

    assert!(matching_ids(&set, "192.168.2.3").contains(&"10".to_string()));
    assert!(!matching_ids(&set, "192.168.9.9").contains(&"10".to_string()));
}

#[test]
fn range_sources_expand_to_minimal_blocks() {
    let set = policies("fixtures/fortigate-01.txt", RangeExpansion::Cidr);
    assert_eq!(
        set.policies[0].srcaddrs.to_strings(),
        vec![
            "192.168.122.1/32",
            "192.168.2.1/32",
            "192.168.2.10/32",
            "192.168.2.2/31",
            "192.168.2.4/30",
            "192.168.2.8/31",
        ]
    );
    assert!(matching_ids(&set, "192.168.2.3").contains(&"10".to_string()));
    assert!(!matching_ids(&set, "192.168.2.11").contains(&"10".to_string()));
}

#[test]
fn missing_address_only_affects_its_policy() {
    let set = policies("fixtures/missing-address.txt", RangeExpansion::Cidr);
    let broken = &set.policies[0];
    assert!(broken.srcaddrs.is_empty());
    assert_eq!(broken.issues.len(), 1);
    assert_eq!(broken.issues[0].unresolved.as_deref(), Some("no_such_address"));

    assert_eq!(matching_ids(&set, "192.168.50.10"), vec!["2"]);
    assert_eq!(matching_ids(&set, "192.168.1.7"), vec!["2"]);
    assert_eq!(set.issue_count(), 1);
}

#[test]
fn vdom_policies_keep_document_order() {
    // The vdom list sorts dmz first; the dump defines root's policies first.
    let set = policies("fixtures/vdoms.txt", RangeExpansion::Cidr);
    let sides: Vec<(Option<&str>, &str, Vec<String>)> = set
        .policies
        .iter()
        .map(|policy| (policy.vdom.as_deref(), policy.id(), policy.srcaddrs.to_strings()))
        .collect();
    assert_eq!(
        sides,
        vec![
            (Some("root"), "1", vec!["192.168.10.0/24".to_string()]),
            (Some("root"), "2", vec!["192.168.10.0/24".to_string()]),
            (Some("dmz"), "1", vec!["172.20.0.0/24".to_string()]),
        ]
    );
    assert_eq!(set.device, "fw-vdom");
}

#[test]
fn global_addresses_resolve_in_every_vdom() {
    let set = policies("fixtures/vdoms.txt", RangeExpansion::Cidr);
    let shared = &set.policies[1];
    assert_eq!(shared.id(), "2");
    assert!(shared.issues.is_empty(), "{:?}", shared.issues);
    assert_eq!(shared.dstaddrs.to_strings(), vec!["10.99.0.0/16"]);
    assert_eq!(set.issue_count(), 0);

    let hits: Vec<(Option<&str>, &str)> = set
        .policies_matching(ip("10.99.1.1"))
        .iter()
        .map(|policy| (policy.vdom.as_deref(), policy.id()))
        .collect();
    assert_eq!(
        hits,
        vec![(Some("root"), "1"), (Some("root"), "2"), (Some("dmz"), "1")]
    );

    let dataset = Dataset::load(&fixture("fixtures/vdoms.txt")).expect("dataset");
    let found: Vec<(Option<String>, String)> =
        addresses_matching(&dataset, ip("10.99.1.1"), ResolveOptions::default())
            .into_iter()
            .map(|found| (found.vdom, found.name))
            .collect();
    assert_eq!(
        found,
        vec![
            (Some("dmz".to_string()), "shared-dns".to_string()),
            (Some("root".to_string()), "shared-dns".to_string()),
        ]
    );
}

fn device_graph(path: &str) -> TopologyGraph {
    let dataset = Dataset::load(&fixture(path)).expect("dataset");
    let set = PolicySet::from_dataset(&dataset, ResolveOptions::default());
    TopologyGraph::build(&dataset, &set).0
}

#[test]
fn paths_cross_devices_on_shared_subnet() {
    let first = device_graph("fixtures/fortigate-01.txt");
    let second = device_graph("fixtures/fortigate-02.txt");
    let graph = TopologyGraph::compose([&first, &second]);
    assert_eq!(graph, TopologyGraph::compose([&second, &first]));

    let paths = find_paths(&graph, ip("192.168.1.20"), ip("172.16.0.10"), PathOptions::default());
    let routes: Vec<Vec<String>> = paths
        .iter()
        .map(|path| path.nodes().iter().map(|node| node.to_string()).collect())
        .collect();
    assert_eq!(
        routes,
        vec![
            vec!["fw-01/port1", "fw-01/port2"],
            vec!["fw-02/port1", "fw-02/port2"],
            vec!["fw-01/port1", "fw-01/port2", "fw-02/port1", "fw-02/port2"],
        ]
    );

    let unreachable = find_paths(&graph, ip("192.168.1.20"), ip("172.31.0.1"), PathOptions::default());
    assert!(unreachable.is_empty());
}
