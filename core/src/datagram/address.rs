//! Address classification helpers

use std::net::Ipv4Addr;

/// 255.255.255.255
pub fn is_limited_broadcast(addr: Ipv4Addr) -> bool {
    addr.is_broadcast()
}

/// 224.0.0.0/24: never forwarded by routers
pub fn is_link_local_multicast(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 224 && octets[1] == 0 && octets[2] == 0
}

/// Subnet-directed broadcast address of `addr` under `netmask`
pub fn directed_broadcast(addr: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) | !u32::from(netmask))
}

/// Number of leading one bits in a netmask
pub fn prefix_length(netmask: Ipv4Addr) -> u32 {
    u32::from(netmask).leading_ones()
}

/// True if `addr` falls inside `network`/`netmask`
pub fn matches_prefix(addr: Ipv4Addr, network: Ipv4Addr, netmask: Ipv4Addr) -> bool {
    let mask = u32::from(netmask);
    u32::from(addr) & mask == u32::from(network) & mask
}
