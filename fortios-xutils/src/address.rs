//! Resolution of firewall address names into IP prefix sets.
//!
//! An [`AddressBook`] holds the `firewall address`, `firewall address6`,
//! `firewall addrgrp` and `firewall addrgrp6` objects of one vdom. A
//! [`Resolver`] borrows a book and memoizes every name it resolves.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use config_block_core::Record;
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::Dataset;
use crate::netutils::{self, AddressError};

pub const ADDRESS_SECTION: &str = "firewall address";
pub const ADDRESS6_SECTION: &str = "firewall address6";
pub const GROUP_SECTION: &str = "firewall addrgrp";
pub const GROUP6_SECTION: &str = "firewall addrgrp6";

/// Names matching the whole address space of the family being resolved.
const ANY_NAMES: [&str; 3] = ["all", "any", "ALL"];
const NONE_NAME: &str = "none";

/// Address families kept in separate namespaces by FortiOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    V4,
    V6,
}

/// Why a name could not be turned into prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("address `{name}` is not defined{}", vdom_suffix(.vdom))]
    UnresolvedReference { name: String, vdom: Option<String> },
    #[error("address group cycle: {}", .chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },
    #[error("address `{name}` has invalid values: {source}")]
    InvalidAddress { name: String, source: AddressError },
}

fn vdom_suffix(vdom: &Option<String>) -> String {
    match vdom {
        Some(vdom) => format!(" in vdom {vdom}"),
        None => String::new(),
    }
}

/// One named address object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressObject {
    Host(IpAddr),
    Range { start: IpAddr, end: IpAddr },
    Subnet(IpNetwork),
    Group(Vec<String>),
    /// fqdn, wildcard, geography, dynamic and other types with no static
    /// IP content. Resolves to an empty set.
    Unaddressable { kind: String },
}

impl AddressObject {
    /// Interpret an address record of the given family.
    pub fn from_address_record(record: &Record, family: Family) -> Result<Self, AddressError> {
        if let (Some(start), Some(end)) = (record.text("start-ip"), record.text("end-ip")) {
            let (start, end) = netutils::parse_range(start, end)?;
            return Ok(if start == end {
                AddressObject::Host(start)
            } else {
                AddressObject::Range { start, end }
            });
        }

        let network = match family {
            Family::V4 => match record.values("subnet").as_slice() {
                [addr, mask] => Some(netutils::subnet_to_network(addr, mask)?),
                [prefix] => Some(netutils::parse_prefix(prefix)?),
                _ => None,
            },
            Family::V6 => match record.text("ip6") {
                Some(prefix) => Some(netutils::parse_prefix(prefix)?),
                None => None,
            },
        };

        Ok(match network {
            Some(net) if netutils::is_host(&net) => AddressObject::Host(net.ip()),
            Some(net) => AddressObject::Subnet(net),
            None => AddressObject::Unaddressable {
                kind: record.text("type").unwrap_or("ipmask").to_string(),
            },
        })
    }

    /// Interpret an address group record.
    pub fn from_group_record(record: &Record) -> Self {
        AddressObject::Group(record.values("member").into_iter().map(str::to_string).collect())
    }

    pub fn kind(&self) -> &str {
        match self {
            AddressObject::Host(_) => "host",
            AddressObject::Range { .. } => "iprange",
            AddressObject::Subnet(_) => "subnet",
            AddressObject::Group(_) => "group",
            AddressObject::Unaddressable { kind } => kind,
        }
    }
}

/// Deduplicated prefixes ordered by their textual form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefixSet(Vec<IpNetwork>);

impl PrefixSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, prefix: IpNetwork) {
        self.0.push(prefix);
        netutils::sort_prefixes(&mut self.0);
    }

    pub fn union(&mut self, other: &PrefixSet) {
        self.0.extend(other.0.iter().copied());
        netutils::sort_prefixes(&mut self.0);
    }

    /// Whether any prefix covers `ip`. Prefixes of the other family never do.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.iter().any(|net| net.contains(ip))
    }

    /// Prefixes covering `ip`.
    pub fn matching(&self, ip: IpAddr) -> impl Iterator<Item = &IpNetwork> + '_ {
        self.0.iter().filter(move |net| net.contains(ip))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpNetwork> + '_ {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl FromIterator<IpNetwork> for PrefixSet {
    fn from_iter<I: IntoIterator<Item = IpNetwork>>(iter: I) -> Self {
        let mut prefixes: Vec<IpNetwork> = iter.into_iter().collect();
        netutils::sort_prefixes(&mut prefixes);
        Self(prefixes)
    }
}

impl fmt::Display for PrefixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_strings().join(" "))
    }
}

/// How iprange objects expand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeExpansion {
    /// Minimal list of aligned CIDR blocks.
    #[default]
    Cidr,
    /// One host prefix per address, up to [`ResolveOptions::host_limit`].
    Hosts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    pub range_expansion: RangeExpansion,
    /// Ranges larger than this fall back to CIDR blocks under
    /// [`RangeExpansion::Hosts`].
    pub host_limit: u32,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            range_expansion: RangeExpansion::Cidr,
            host_limit: 1024,
        }
    }
}

/// Address objects of one vdom, by family.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    vdom: Option<String>,
    v4: IndexMap<String, Result<AddressObject, AddressError>>,
    v6: IndexMap<String, Result<AddressObject, AddressError>>,
}

impl AddressBook {
    /// Collect the address tables of `vdom` from a dataset.
    pub fn from_dataset(dataset: &Dataset, vdom: Option<&str>) -> Self {
        let mut book = AddressBook {
            vdom: vdom.map(ToOwned::to_owned),
            ..AddressBook::default()
        };
        for record in dataset.records_in(ADDRESS_SECTION, vdom) {
            book.insert_address(record, Family::V4);
        }
        for record in dataset.records_in(ADDRESS6_SECTION, vdom) {
            book.insert_address(record, Family::V6);
        }
        for record in dataset.records_in(GROUP_SECTION, vdom) {
            book.insert(Family::V4, &record.edit, Ok(AddressObject::from_group_record(record)));
        }
        for record in dataset.records_in(GROUP6_SECTION, vdom) {
            book.insert(Family::V6, &record.edit, Ok(AddressObject::from_group_record(record)));
        }
        tracing::debug!(
            vdom = ?book.vdom,
            v4 = book.v4.len(),
            v6 = book.v6.len(),
            "loaded address book"
        );
        book
    }

    fn insert_address(&mut self, record: &Record, family: Family) {
        let object = AddressObject::from_address_record(record, family);
        if let Err(err) = &object {
            tracing::warn!(name = %record.edit, vdom = ?self.vdom, "invalid address object: {err}");
        }
        self.insert(family, &record.edit, object);
    }

    /// Add or replace one object.
    pub fn insert(
        &mut self,
        family: Family,
        name: &str,
        object: Result<AddressObject, AddressError>,
    ) {
        let table = self.table_mut(family);
        if table.insert(name.to_string(), object).is_some() {
            tracing::debug!(name, "address name defined more than once; last one wins");
        }
    }

    pub fn vdom(&self) -> Option<&str> {
        self.vdom.as_deref()
    }

    pub fn get(&self, family: Family, name: &str) -> Option<&Result<AddressObject, AddressError>> {
        self.table(family).get(name)
    }

    /// Names of a family in definition order.
    pub fn names(&self, family: Family) -> impl Iterator<Item = &str> + '_ {
        self.table(family).keys().map(String::as_str)
    }

    fn table(&self, family: Family) -> &IndexMap<String, Result<AddressObject, AddressError>> {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    fn table_mut(
        &mut self,
        family: Family,
    ) -> &mut IndexMap<String, Result<AddressObject, AddressError>> {
        match family {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        }
    }
}

/// Memoizing resolver over one [`AddressBook`].
pub struct Resolver<'a> {
    book: &'a AddressBook,
    options: ResolveOptions,
    memo: HashMap<(Family, String), Result<PrefixSet, ResolveError>>,
    in_progress: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(book: &'a AddressBook, options: ResolveOptions) -> Self {
        Self {
            book,
            options,
            memo: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    pub fn book(&self) -> &'a AddressBook {
        self.book
    }

    /// Resolve every name and union the results.
    ///
    /// The first failing name aborts the whole list.
    pub fn resolve_all<S: AsRef<str>>(
        &mut self,
        names: &[S],
        family: Family,
    ) -> Result<PrefixSet, ResolveError> {
        let mut out = PrefixSet::new();
        for name in names {
            out.union(&self.resolve(name.as_ref(), family)?);
        }
        Ok(out)
    }

    /// Resolve one name.
    pub fn resolve(&mut self, name: &str, family: Family) -> Result<PrefixSet, ResolveError> {
        if ANY_NAMES.contains(&name) {
            return Ok(std::iter::once(netutils::any_prefix(family == Family::V6)).collect());
        }
        if name == NONE_NAME {
            return Ok(PrefixSet::new());
        }

        let key = (family, name.to_string());
        if let Some(done) = self.memo.get(&key) {
            return done.clone();
        }
        if self.in_progress.iter().any(|open| open == name) {
            let mut chain: Vec<String> = self
                .in_progress
                .iter()
                .skip_while(|open| open.as_str() != name)
                .cloned()
                .collect();
            chain.push(name.to_string());
            return Err(ResolveError::CyclicReference { chain });
        }

        self.in_progress.push(name.to_string());
        let result = self.resolve_uncached(name, family);
        self.in_progress.pop();

        self.memo.insert(key, result.clone());
        result
    }

    fn resolve_uncached(&mut self, name: &str, family: Family) -> Result<PrefixSet, ResolveError> {
        let book = self.book;
        let object = match book.get(family, name) {
            Some(Ok(object)) => object,
            Some(Err(source)) => {
                return Err(ResolveError::InvalidAddress {
                    name: name.to_string(),
                    source: source.clone(),
                })
            }
            None => {
                return Err(ResolveError::UnresolvedReference {
                    name: name.to_string(),
                    vdom: book.vdom.clone(),
                })
            }
        };

        match object {
            AddressObject::Host(ip) => Ok(std::iter::once(netutils::host_prefix(*ip)).collect()),
            AddressObject::Subnet(net) => Ok(std::iter::once(*net).collect()),
            AddressObject::Range { start, end } => Ok(self.expand_range(name, *start, *end)),
            AddressObject::Group(members) => self.resolve_all(members, family),
            AddressObject::Unaddressable { kind } => {
                tracing::debug!(name, kind = %kind, "address has no static IP content");
                Ok(PrefixSet::new())
            }
        }
    }

    fn expand_range(&self, name: &str, start: IpAddr, end: IpAddr) -> PrefixSet {
        match self.options.range_expansion {
            RangeExpansion::Cidr => netutils::range_to_cidrs(start, end).into_iter().collect(),
            RangeExpansion::Hosts => {
                let size = netutils::range_len(start, end);
                if size > u128::from(self.options.host_limit) {
                    tracing::warn!(
                        name,
                        size,
                        limit = self.options.host_limit,
                        "range too large for per-host expansion; using CIDR blocks"
                    );
                    netutils::range_to_cidrs(start, end).into_iter().collect()
                } else {
                    netutils::range_to_hosts(start, end).into_iter().collect()
                }
            }
        }
    }
}
