//! IP address helpers shared by the resolver, the policy index and the
//! topology builder.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnetwork::{IpNetwork, Ipv4Network};
use thiserror::Error;

/// Problems with the literal IP values of an address object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("`{0}` is not an IP address")]
    InvalidIp(String),
    #[error("`{0}` is not a netmask or prefix length")]
    InvalidMask(String),
    #[error("`{0}` is not an IP prefix")]
    InvalidPrefix(String),
    #[error("range {start} - {end} mixes IPv4 and IPv6")]
    MixedFamilies { start: String, end: String },
    #[error("range {start} - {end} ends before it starts")]
    ReversedRange { start: String, end: String },
}

/// Parse an IP given on the command line or in a query.
///
/// A trailing `/32` or `/128` is accepted and ignored.
pub fn normalize_ip(text: &str) -> Result<IpAddr, AddressError> {
    let trimmed = text.trim();
    let addr = match trimmed.split_once('/') {
        Some((addr, "32" | "128")) => addr,
        Some(_) => return Err(AddressError::InvalidIp(trimmed.to_string())),
        None => trimmed,
    };
    IpAddr::from_str(addr).map_err(|_| AddressError::InvalidIp(trimmed.to_string()))
}

/// Single-address prefix for `ip`.
pub fn host_prefix(ip: IpAddr) -> IpNetwork {
    match ip {
        IpAddr::V4(v4) => IpNetwork::V4(Ipv4Network::from(v4)),
        IpAddr::V6(v6) => IpNetwork::V6(v6.into()),
    }
}

pub fn is_host(net: &IpNetwork) -> bool {
    match net {
        IpNetwork::V4(v4) => v4.prefix() == 32,
        IpNetwork::V6(v6) => v6.prefix() == 128,
    }
}

/// Whole IPv4 (`0.0.0.0/0`) or IPv6 (`::/0`) address space.
pub fn any_prefix(v6: bool) -> IpNetwork {
    if v6 {
        block(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0, 0)
    } else {
        block(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, 0)
    }
}

/// Convert a FortiOS `subnet <addr> <mask>` pair into a prefix.
///
/// The mask may be dotted (`255.255.255.0`) or a prefix length. An address
/// with host bits set under a non-host mask denotes that single host.
pub fn subnet_to_network(addr: &str, mask: &str) -> Result<IpNetwork, AddressError> {
    let ip = Ipv4Addr::from_str(addr).map_err(|_| AddressError::InvalidIp(addr.to_string()))?;
    let prefix = match Ipv4Addr::from_str(mask) {
        Ok(dotted) => ipnetwork::ipv4_mask_to_prefix(dotted)
            .map_err(|_| AddressError::InvalidMask(mask.to_string()))?,
        Err(_) => mask
            .parse::<u8>()
            .ok()
            .filter(|len| *len <= 32)
            .ok_or_else(|| AddressError::InvalidMask(mask.to_string()))?,
    };
    canonical(IpAddr::V4(ip), prefix)
}

/// Parse `a.b.c.d/len`, `x::y/len` or a bare address into a prefix, with
/// the same host-bits rule as [`subnet_to_network`].
pub fn parse_prefix(text: &str) -> Result<IpNetwork, AddressError> {
    let net = IpNetwork::from_str(text.trim())
        .map_err(|_| AddressError::InvalidPrefix(text.to_string()))?;
    canonical(net.ip(), net.prefix())
}

fn canonical(ip: IpAddr, prefix: u8) -> Result<IpNetwork, AddressError> {
    let net = IpNetwork::new(ip, prefix)
        .map_err(|_| AddressError::InvalidPrefix(format!("{ip}/{prefix}")))?;
    if net.network() == ip {
        Ok(net)
    } else {
        Ok(host_prefix(ip))
    }
}

/// Address of an interface `ip <addr> <mask>` setting, keeping host bits.
///
/// Returns `None` for the unconfigured `0.0.0.0 0.0.0.0`.
pub fn interface_address(addr: &str, mask: &str) -> Result<Option<IpNetwork>, AddressError> {
    let ip = Ipv4Addr::from_str(addr).map_err(|_| AddressError::InvalidIp(addr.to_string()))?;
    let prefix = ipnetwork::ipv4_mask_to_prefix(
        Ipv4Addr::from_str(mask).map_err(|_| AddressError::InvalidMask(mask.to_string()))?,
    )
    .map_err(|_| AddressError::InvalidMask(mask.to_string()))?;
    if ip.is_unspecified() {
        return Ok(None);
    }
    let net = Ipv4Network::new(ip, prefix)
        .map_err(|_| AddressError::InvalidPrefix(format!("{addr}/{mask}")))?;
    Ok(Some(IpNetwork::V4(net)))
}

/// Network part of an interface address (`192.168.1.99/24` -> `192.168.1.0/24`).
pub fn network_of(address: &IpNetwork) -> IpNetwork {
    block(address.network(), to_bits(address.network()), address.prefix())
}

/// Parse the two ends of an address range.
pub fn parse_range(start: &str, end: &str) -> Result<(IpAddr, IpAddr), AddressError> {
    let first = IpAddr::from_str(start).map_err(|_| AddressError::InvalidIp(start.to_string()))?;
    let last = IpAddr::from_str(end).map_err(|_| AddressError::InvalidIp(end.to_string()))?;
    if first.is_ipv4() != last.is_ipv4() {
        return Err(AddressError::MixedFamilies {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    if to_bits(first) > to_bits(last) {
        return Err(AddressError::ReversedRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok((first, last))
}

/// Number of addresses in `[start, end]`, saturating at `u128::MAX`.
pub fn range_len(start: IpAddr, end: IpAddr) -> u128 {
    (to_bits(end) - to_bits(start)).saturating_add(1)
}

/// Minimal ordered list of aligned CIDR blocks whose union is exactly
/// `[start, end]`. Both ends must be of the same family with `start <= end`.
pub fn range_to_cidrs(start: IpAddr, end: IpAddr) -> Vec<IpNetwork> {
    let width = family_width(start);
    let last = to_bits(end);
    let mut cursor = to_bits(start);
    let mut blocks = Vec::new();

    loop {
        let align = if cursor == 0 {
            width
        } else {
            cursor.trailing_zeros().min(width)
        };
        let span = last - cursor;
        let fit = if span == u128::MAX {
            128
        } else {
            127 - (span + 1).leading_zeros()
        };
        let bits = align.min(fit);
        blocks.push(block(start, cursor, (width - bits) as u8));

        if bits >= 128 {
            break;
        }
        let block_last = cursor + ((1u128 << bits) - 1);
        if block_last >= last {
            break;
        }
        cursor = block_last + 1;
    }

    blocks
}

/// One host prefix per address of `[start, end]`.
pub fn range_to_hosts(start: IpAddr, end: IpAddr) -> Vec<IpNetwork> {
    let last = to_bits(end);
    let mut cursor = to_bits(start);
    let mut hosts = Vec::new();
    loop {
        hosts.push(host_prefix(from_bits(start, cursor)));
        if cursor >= last {
            break;
        }
        cursor += 1;
    }
    hosts
}

/// Sort prefixes by their textual form and drop duplicates.
pub fn sort_prefixes(prefixes: &mut Vec<IpNetwork>) {
    prefixes.sort_by_cached_key(|net| net.to_string());
    prefixes.dedup();
}

fn family_width(ip: IpAddr) -> u32 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn to_bits(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn from_bits(family: IpAddr, bits: u128) -> IpAddr {
    match family {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

fn block(family: IpAddr, bits: u128, prefix: u8) -> IpNetwork {
    let ip = from_bits(family, bits);
    IpNetwork::new(ip, prefix).unwrap_or_else(|_| host_prefix(ip))
}
