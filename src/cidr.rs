use std::{net::Ipv4Addr, str::FromStr};

use ipnetwork::Ipv4Network;

use crate::error::{SlbError, SlbResult};

pub fn parse(cidr: &str) -> SlbResult<Ipv4Network> {
    Ipv4Network::from_str(cidr.trim()).map_err(|_| SlbError::InvalidCidr(cidr.to_string()))
}

/// `ip | ~mask`
#[must_use]
pub fn broadcast(net: &Ipv4Network) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(net.ip()) | !u32::from(net.mask()))
}

/// `inner` lies entirely within `outer`.
#[must_use]
pub fn contains(outer: &Ipv4Network, inner: &Ipv4Network) -> bool {
    outer.contains(inner.ip()) && outer.contains(broadcast(inner))
}

/// `inner` lies entirely within `outer` and is not the same block.
#[must_use]
pub fn really_contains(outer: &Ipv4Network, inner: &Ipv4Network) -> bool {
    outer != inner && contains(outer, inner)
}
