use colored::Colorize;
use serde_json::Value;

use crate::dataset::Dataset;
use crate::paths::{HopVia, Path};
use crate::policy::{AddressMatch, PolicyRecord, PolicySet};
use crate::topology::{BuildStats, TopologyGraph};

/// Render one line per policy: id, action, interfaces and resolved sides.
pub fn render_policies(policies: &[&PolicyRecord]) -> String {
    let mut out = Vec::new();
    for policy in policies {
        let action = match policy.action() {
            "accept" if policy.is_enabled() => "accept".green().to_string(),
            "accept" => "accept (disabled)".yellow().to_string(),
            other => other.red().to_string(),
        };
        let scope = policy
            .vdom
            .as_deref()
            .map(|vdom| format!("[{vdom}] "))
            .unwrap_or_default();
        out.push(format!(
            "{scope}policy {} {action} name={} {} -> {}",
            policy.id().bold(),
            policy.name().unwrap_or("-"),
            policy.srcintf().join(","),
            policy.dstintf().join(","),
        ));
        out.push(format!("  src: {}", or_empty(&policy.srcaddrs.to_string())));
        out.push(format!("  dst: {}", or_empty(&policy.dstaddrs.to_string())));
    }
    out.join("\n")
}

/// Render unresolved references and other resolution problems.
pub fn render_issues(set: &PolicySet) -> String {
    let mut out = Vec::new();
    for (policy, issue) in set.issues() {
        out.push(
            format!(
                "! policy {} {}: {}",
                policy.id(),
                issue.field,
                issue.message
            )
            .magenta()
            .to_string(),
        );
    }
    out.join("\n")
}

/// Render address objects covering an IP.
pub fn render_address_matches(matches: &[AddressMatch]) -> String {
    let mut out = Vec::new();
    for found in matches {
        let scope = found
            .vdom
            .as_deref()
            .map(|vdom| format!("[{vdom}] "))
            .unwrap_or_default();
        out.push(format!(
            "{scope}{} ({}): {}",
            found.name.cyan(),
            found.kind,
            found.prefixes
        ));
    }
    out.join("\n")
}

/// Render paths, one block per path with a line per hop.
pub fn render_paths(paths: &[Path]) -> String {
    if paths.is_empty() {
        return "no path found".yellow().to_string();
    }
    let mut out = Vec::new();
    for (index, path) in paths.iter().enumerate() {
        out.push(format!("path {} ({} hops)", index + 1, path.len()).bold().to_string());
        for hop in &path.hops {
            let via = match &hop.via {
                HopVia::Policies { policies } => {
                    let ids: Vec<String> = policies
                        .iter()
                        .map(|label| format!("{}#{}", label.device, label.policy_id))
                        .collect();
                    format!("policy {}", ids.join(",")).green().to_string()
                }
                HopVia::Link { network } => format!("link {network}").blue().to_string(),
            };
            out.push(format!("  {} -> {}  via {via}", hop.from, hop.to));
        }
    }
    out.join("\n")
}

/// Node, edge and link counts of a graph.
pub fn render_graph_summary(graph: &TopologyGraph, stats: Option<&BuildStats>) -> String {
    let links = graph.edges().filter(|edge| edge.is_link()).count();
    let mut line = format!(
        "nodes={} edges={} policy_edges={} link_edges={}",
        graph.node_count(),
        graph.edge_count(),
        graph.edge_count() - links,
        links
    );
    if let Some(stats) = stats {
        line.push_str(&format!(
            " inactive_policies={} unknown_interfaces={}",
            stats.inactive_policies, stats.unknown_interfaces
        ));
    }
    line.cyan().to_string()
}

/// Short description of a parsed dataset.
pub fn render_dataset_summary(dataset: &Dataset) -> String {
    let meta = &dataset.metadata;
    format!(
        "hostname={} vdoms={} sections={} config_version={}",
        meta.hostname.as_deref().unwrap_or("-"),
        meta.vdoms.join(","),
        dataset.sections().len(),
        meta.config_version.as_deref().unwrap_or("-"),
    )
    .cyan()
    .to_string()
}

/// Render flat table rows, one line of `key=value` cells per row.
pub fn render_table(rows: &[Value]) -> String {
    rows.iter()
        .map(|row| match row {
            Value::Object(cells) => cells
                .iter()
                .map(|(key, value)| format!("{}={}", key.bold(), cell_text(value)))
                .collect::<Vec<_>>()
                .join(" "),
            other => cell_text(other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn or_empty(text: &str) -> &str {
    if text.is_empty() {
        "(none)"
    } else {
        text
    }
}
