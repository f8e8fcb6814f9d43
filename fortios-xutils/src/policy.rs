//! Firewall policies with their source and destination addresses resolved.

use std::fs;
use std::net::IpAddr;
use std::path::Path;

use config_block_core::{Record, Section};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::address::{AddressBook, Family, PrefixSet, ResolveError, ResolveOptions, Resolver};
use crate::dataset::{Dataset, DatasetError};
use crate::snapshot::{self, SnapshotError, SnapshotKind};

pub const POLICY_SECTION: &str = "firewall policy";

/// Address fields merged into each side, with their family.
const SRC_FIELDS: [(&str, Family); 2] = [("srcaddr", Family::V4), ("srcaddr6", Family::V6)];
const DST_FIELDS: [(&str, Family); 2] = [("dstaddr", Family::V4), ("dstaddr6", Family::V6)];

#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to read policies from {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// A reference problem found while resolving one address field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyIssue {
    /// `srcaddr`, `dstaddr6`, ...
    pub field: String,
    /// Name of the missing object for unresolved references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<String>,
    pub message: String,
}

impl PolicyIssue {
    fn new(field: &str, error: &ResolveError) -> Self {
        let unresolved = match error {
            ResolveError::UnresolvedReference { name, .. } => Some(name.clone()),
            _ => None,
        };
        Self {
            field: field.to_string(),
            unresolved,
            message: error.to_string(),
        }
    }
}

/// A `firewall policy` entry plus its resolved address sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vdom: Option<String>,
    #[serde(flatten)]
    pub record: Record,
    pub srcaddrs: PrefixSet,
    pub dstaddrs: PrefixSet,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<PolicyIssue>,
}

impl PolicyRecord {
    /// Resolve both sides of `record` with `resolver`.
    pub fn resolve(record: &Record, resolver: &mut Resolver<'_>) -> Self {
        let mut issues = Vec::new();
        let srcaddrs = resolve_side(record, &SRC_FIELDS, resolver, &mut issues);
        let dstaddrs = resolve_side(record, &DST_FIELDS, resolver, &mut issues);
        Self {
            vdom: record.vdom.clone(),
            record: record.clone(),
            srcaddrs,
            dstaddrs,
            issues,
        }
    }

    /// Policy id (the `edit` identifier).
    pub fn id(&self) -> &str {
        &self.record.edit
    }

    pub fn name(&self) -> Option<&str> {
        self.record.text("name")
    }

    /// `action` defaults to deny when not set.
    pub fn action(&self) -> &str {
        self.record.text("action").unwrap_or("deny")
    }

    pub fn is_enabled(&self) -> bool {
        self.record.text("status") != Some("disable")
    }

    pub fn accepts(&self) -> bool {
        self.is_enabled() && self.action() == "accept"
    }

    pub fn srcintf(&self) -> Vec<&str> {
        self.record.values("srcintf")
    }

    pub fn dstintf(&self) -> Vec<&str> {
        self.record.values("dstintf")
    }

    /// Whether `ip` is in either side. Policies with unresolved
    /// references never match.
    pub fn matches(&self, ip: IpAddr) -> bool {
        self.issues.is_empty() && (self.srcaddrs.contains(ip) || self.dstaddrs.contains(ip))
    }

    /// Whether traffic from `src` to `dst` is covered by both sides.
    pub fn admits(&self, src: IpAddr, dst: IpAddr) -> bool {
        self.srcaddrs.contains(src) && self.dstaddrs.contains(dst)
    }

    /// Flat row: every original field plus `vdom`, `srcaddrs` and `dstaddrs`.
    pub fn to_row(&self, device: &str) -> Value {
        let mut row = Map::new();
        row.insert("device".to_string(), Value::String(device.to_string()));
        row.insert(
            "vdom".to_string(),
            self.vdom.clone().map(Value::String).unwrap_or(Value::Null),
        );
        if let Ok(Value::Object(fields)) = serde_json::to_value(&self.record) {
            row.extend(fields);
        }
        row.insert("srcaddrs".to_string(), string_list(&self.srcaddrs));
        row.insert("dstaddrs".to_string(), string_list(&self.dstaddrs));
        Value::Object(row)
    }
}

fn string_list(set: &PrefixSet) -> Value {
    Value::Array(set.to_strings().into_iter().map(Value::String).collect())
}

fn resolve_side(
    record: &Record,
    fields: &[(&str, Family)],
    resolver: &mut Resolver<'_>,
    issues: &mut Vec<PolicyIssue>,
) -> PrefixSet {
    let mut side = PrefixSet::new();
    let mut failed = false;
    for (field, family) in fields {
        for name in record.values(field) {
            match resolver.resolve(name, *family) {
                Ok(prefixes) => side.union(&prefixes),
                Err(err) => {
                    tracing::warn!(
                        policy = %record.edit,
                        vdom = ?record.vdom,
                        field,
                        "{err}"
                    );
                    issues.push(PolicyIssue::new(field, &err));
                    failed = true;
                }
            }
        }
    }
    if failed {
        PrefixSet::new()
    } else {
        side
    }
}

/// Vdom whose address tables a policy section resolves against.
fn policy_scope(section: &Section, scoped: bool) -> Option<&str> {
    if scoped {
        section.vdom.as_deref()
    } else {
        None
    }
}

/// All resolved policies of one device, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    pub device: String,
    pub policies: Vec<PolicyRecord>,
}

impl PolicySet {
    /// Resolve every policy of `dataset` in document order, each against
    /// the address tables of its own vdom.
    pub fn from_dataset(dataset: &Dataset, options: ResolveOptions) -> Self {
        let scoped = dataset.has_vdoms();
        let mut books: IndexMap<Option<&str>, AddressBook> = IndexMap::new();
        for section in dataset.sections_named(POLICY_SECTION) {
            let scope = policy_scope(section, scoped);
            books
                .entry(scope)
                .or_insert_with(|| AddressBook::from_dataset(dataset, scope));
        }
        let mut resolvers: IndexMap<Option<&str>, Resolver<'_>> = books
            .iter()
            .map(|(scope, book)| (*scope, Resolver::new(book, options)))
            .collect();

        let mut policies = Vec::new();
        for section in dataset.sections_named(POLICY_SECTION) {
            let Some(resolver) = resolvers.get_mut(&policy_scope(section, scoped)) else {
                continue;
            };
            for record in section.records() {
                policies.push(PolicyRecord::resolve(record, resolver));
            }
        }
        let set = Self {
            device: dataset.device_name(),
            policies,
        };
        tracing::info!(
            device = %set.device,
            policies = set.policies.len(),
            issues = set.issue_count(),
            "resolved firewall policies"
        );
        set
    }

    /// Load policies saved by [`PolicySet::save`], or build them from any
    /// input [`Dataset::load`] accepts.
    pub fn load(path: &Path, options: ResolveOptions) -> Result<Self, PolicyLoadError> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.ends_with(".gz") {
            match snapshot::load(path, SnapshotKind::Policies) {
                Ok(set) => return Ok(set),
                Err(SnapshotError::WrongKind {
                    found: SnapshotKind::Dataset,
                    ..
                }) => {}
                Err(err) => return Err(err.into()),
            }
        } else if name.ends_with(".json") {
            let raw = fs::read_to_string(path).map_err(|source| PolicyLoadError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let value: Value =
                serde_json::from_str(&raw).map_err(|source| PolicyLoadError::Json {
                    path: path.display().to_string(),
                    source,
                })?;
            if value.get("policies").is_some() {
                return serde_json::from_value(value).map_err(|source| PolicyLoadError::Json {
                    path: path.display().to_string(),
                    source,
                });
            }
        }
        let dataset = Dataset::load(path)?;
        Ok(Self::from_dataset(&dataset, options))
    }

    /// Save as a snapshot (`*.gz`) or as plain JSON.
    pub fn save(&self, path: &Path) -> Result<(), PolicyLoadError> {
        if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
            snapshot::save(path, SnapshotKind::Policies, self)?;
            return Ok(());
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| PolicyLoadError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, text).map_err(|source| PolicyLoadError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Policies whose source or destination covers `ip`, in document order.
    pub fn policies_matching(&self, ip: IpAddr) -> Vec<&PolicyRecord> {
        self.policies.iter().filter(|policy| policy.matches(ip)).collect()
    }

    /// Flattened rows for tabular consumers.
    pub fn policy_table(&self) -> Vec<Value> {
        self.policies
            .iter()
            .map(|policy| policy.to_row(&self.device))
            .collect()
    }

    /// Every resolution problem with the policy it belongs to.
    pub fn issues(&self) -> impl Iterator<Item = (&PolicyRecord, &PolicyIssue)> + '_ {
        self.policies
            .iter()
            .flat_map(|policy| policy.issues.iter().map(move |issue| (policy, issue)))
    }

    pub fn issue_count(&self) -> usize {
        self.policies.iter().map(|policy| policy.issues.len()).sum()
    }
}

/// An address or group object whose prefixes cover a searched IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressMatch {
    pub vdom: Option<String>,
    pub name: String,
    pub kind: String,
    pub prefixes: PrefixSet,
}

/// Address objects of every vdom of `dataset` covering `ip`.
pub fn addresses_matching(
    dataset: &Dataset,
    ip: IpAddr,
    options: ResolveOptions,
) -> Vec<AddressMatch> {
    let family = if ip.is_ipv4() { Family::V4 } else { Family::V6 };
    let mut out = Vec::new();
    for scope in dataset.scopes() {
        let book = AddressBook::from_dataset(dataset, scope);
        let mut resolver = Resolver::new(&book, options);
        for name in book.names(family) {
            let Ok(prefixes) = resolver.resolve(name, family) else {
                continue;
            };
            if !prefixes.contains(ip) {
                continue;
            }
            let kind = match book.get(family, name) {
                Some(Ok(object)) => object.kind().to_string(),
                _ => "unknown".to_string(),
            };
            out.push(AddressMatch {
                vdom: scope.map(ToOwned::to_owned),
                name: name.to_string(),
                kind,
                prefixes: prefixes.matching(ip).copied().collect(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use config_block_core::parse;
    use pretty_assertions::assert_eq;

    use super::{addresses_matching, PolicySet};
    use crate::address::ResolveOptions;
    use crate::dataset::Dataset;

    const DUMP: &str = r#"
config firewall address
    edit "lan"
        set subnet 192.168.2.0 255.255.255.0
    next
    edit "web"
        set subnet 10.0.0.80 255.255.255.255
    next
end
config firewall policy
    edit 1
        set name "lan-to-web"
        set srcintf "port1"
        set dstintf "port2"
        set srcaddr "lan"
        set dstaddr "web"
        set action accept
        set service "HTTP"
    next
    edit 2
        set srcintf "port1"
        set dstintf "port2"
        set srcaddr "ghost"
        set dstaddr "web"
        set action accept
    next
    edit 3
        set srcintf "port2"
        set dstintf "port1"
        set srcaddr "web"
        set dstaddr "all"
        set status disable
    next
end
"#;

    fn policies() -> PolicySet {
        let doc = parse(DUMP).expect("parse");
        let dataset = Dataset::from_document(&doc, "fw.conf");
        PolicySet::from_dataset(&dataset, ResolveOptions::default())
    }

    #[test]
    fn matching_uses_either_side() {
        let set = policies();
        let ids: Vec<&str> = set
            .policies_matching("192.168.2.3".parse().expect("ip"))
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert!(set
            .policies_matching("192.168.9.9".parse().expect("ip"))
            .iter()
            .all(|p| p.id() == "3"));
    }

    #[test]
    fn unresolved_side_is_empty_and_recorded() {
        let set = policies();
        let broken = &set.policies[1];
        assert!(broken.srcaddrs.is_empty());
        assert_eq!(broken.dstaddrs.to_strings(), vec!["10.0.0.80/32"]);
        assert_eq!(set.issue_count(), 1);
        let (policy, issue) = set.issues().next().expect("issue");
        assert_eq!(policy.id(), "2");
        assert_eq!(issue.unresolved.as_deref(), Some("ghost"));

        let ids: Vec<&str> = set
            .policies_matching("10.0.0.80".parse().expect("ip"))
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn policy_flags() {
        let set = policies();
        assert!(set.policies[0].accepts());
        assert!(!set.policies[2].accepts());
        assert_eq!(set.policies[2].action(), "deny");
    }

    #[test]
    fn table_rows_carry_fields_and_prefixes() {
        let set = policies();
        let table = set.policy_table();
        assert_eq!(table[0]["edit"], "1");
        assert_eq!(table[0]["service"], "HTTP");
        assert_eq!(table[0]["device"], "fw");
        assert_eq!(table[0]["srcaddrs"][0], "192.168.2.0/24");
    }

    #[test]
    fn address_search_reports_covering_objects() {
        let doc = parse(DUMP).expect("parse");
        let dataset = Dataset::from_document(&doc, "fw.conf");
        let found = addresses_matching(
            &dataset,
            "192.168.2.77".parse().expect("ip"),
            ResolveOptions::default(),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "lan");
        assert_eq!(found[0].kind, "subnet");
    }

    #[test]
    fn json_round_trip_keeps_vdom_and_order() {
        let set = policies();
        let json = serde_json::to_string(&set).expect("serialize");
        let back: PolicySet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.policies.len(), set.policies.len());
        assert_eq!(back.policies[1].issues, set.policies[1].issues);
        assert_eq!(back.policies[0].srcaddrs, set.policies[0].srcaddrs);
    }
}
