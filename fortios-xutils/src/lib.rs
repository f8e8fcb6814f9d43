//! FortiOS configuration extraction and reachability analysis.
//!
//! Configuration dumps are parsed by `config-block-core` into sections of
//! records. This crate builds on those records:
//!
//! - [`dataset`]: a parsed device with metadata, plus the JSON output layout
//! - [`netutils`]: IP, mask, range and CIDR helpers
//! - [`address`]: address and group objects resolved to prefix sets
//! - [`policy`]: firewall policies with resolved sides, IP search, flat table
//! - [`topology`]: interface graph of one or more devices
//! - [`paths`]: paths traffic can take between two addresses
//! - [`snapshot`]: gzip'd JSON persistence of datasets, policies and graphs
//! - [`settings`]: TOML settings with built-in defaults
//! - [`inspect`] and [`report`]: terminal rendering

pub mod address;
pub mod dataset;
pub mod inspect;
pub mod netutils;
pub mod paths;
pub mod policy;
pub mod report;
pub mod settings;
pub mod snapshot;
pub mod topology;
