//! Routing table: best-match unicast and multicast route lookup

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::interface::{InterfaceId, InterfaceTable};
use crate::datagram::address::{matches_prefix, prefix_length};

/// Unicast route entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Unspecified for directly connected networks
    pub gateway: Ipv4Addr,
    pub interface: InterfaceId,
    #[serde(default)]
    pub metric: u32,
}

impl Route {
    pub fn new(destination: Ipv4Addr, netmask: Ipv4Addr, gateway: Ipv4Addr, interface: InterfaceId) -> Self {
        Self {
            destination,
            netmask,
            gateway,
            interface,
            metric: 0,
        }
    }

    /// 0.0.0.0/0 via `gateway`
    pub fn default_route(gateway: Ipv4Addr, interface: InterfaceId) -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, gateway, interface)
    }

    pub fn matches(&self, dest: Ipv4Addr) -> bool {
        matches_prefix(dest, self.destination, self.netmask)
    }
}

/// Downstream interface of a multicast route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildInterface {
    pub interface: InterfaceId,
    /// No downstream routers: only forward if the link has listeners
    #[serde(default)]
    pub leaf: bool,
}

/// Multicast route: (origin prefix, group) → parent and children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastRoute {
    pub origin: Ipv4Addr,
    pub origin_netmask: Ipv4Addr,
    /// Unspecified matches every group
    pub group: Ipv4Addr,
    /// Expected arrival interface (reverse-path check)
    #[serde(default)]
    pub parent: Option<InterfaceId>,
    pub children: Vec<ChildInterface>,
}

impl MulticastRoute {
    fn matches(&self, origin: Ipv4Addr, group: Ipv4Addr) -> bool {
        (self.group.is_unspecified() || self.group == group)
            && matches_prefix(origin, self.origin, self.origin_netmask)
    }

    /// Longer origin prefix wins, an exact group beats the wildcard
    fn specificity(&self) -> (u32, bool) {
        (prefix_length(self.origin_netmask), !self.group.is_unspecified())
    }
}

/// Route lookups consumed by the forwarding engine
pub trait RoutingTable {
    fn find_best_matching_route(&self, dest: Ipv4Addr) -> Option<Route>;

    fn find_best_matching_multicast_route(&self, origin: Ipv4Addr, group: Ipv4Addr) -> Option<MulticastRoute>;

    fn is_local_address(&self, addr: Ipv4Addr) -> bool;

    fn is_forwarding_enabled(&self) -> bool;

    fn is_multicast_forwarding_enabled(&self) -> bool;

    /// Interface whose subnet broadcast address is `addr`
    fn interface_by_local_broadcast_address(&self, addr: Ipv4Addr) -> Option<InterfaceId>;

    fn is_local_broadcast_address(&self, addr: Ipv4Addr) -> bool {
        self.interface_by_local_broadcast_address(addr).is_some()
    }

    /// Interface that owns `addr`
    fn interface_by_address(&self, addr: Ipv4Addr) -> Option<InterfaceId>;

    /// Interface on the shortest path toward `addr`
    fn interface_for_dest_addr(&self, addr: Ipv4Addr) -> Option<InterfaceId> {
        self.find_best_matching_route(addr).map(|route| route.interface)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalAddress {
    interface: InterfaceId,
    address: Ipv4Addr,
    broadcast: Option<Ipv4Addr>,
}

/// In-memory routing table with longest-prefix matching
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRoutingTable {
    routes: Vec<Route>,
    multicast_routes: Vec<MulticastRoute>,
    local_addresses: Vec<LocalAddress>,
    forwarding: bool,
    multicast_forwarding: bool,
}

impl StaticRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local addresses and connected-network routes for every addressed interface
    pub fn from_interfaces(interfaces: &dyn InterfaceTable) -> Self {
        let mut table = Self::new();
        for index in 0..interfaces.interface_count() {
            let Some(ie) = interfaces.interface_by_index(index) else {
                continue;
            };
            if !ie.has_address() {
                continue;
            }
            table.local_addresses.push(LocalAddress {
                interface: ie.id,
                address: ie.address,
                broadcast: ie.local_broadcast_address(),
            });
            if !ie.loopback && !ie.netmask.is_unspecified() {
                table.add_route(Route::new(ie.address, ie.netmask, Ipv4Addr::UNSPECIFIED, ie.id));
            }
        }
        table
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn add_multicast_route(&mut self, route: MulticastRoute) {
        self.multicast_routes.push(route);
    }

    pub fn add_local_address(&mut self, interface: InterfaceId, address: Ipv4Addr) {
        self.local_addresses.push(LocalAddress {
            interface,
            address,
            broadcast: None,
        });
    }

    pub fn set_forwarding(&mut self, enabled: bool) {
        self.forwarding = enabled;
    }

    pub fn set_multicast_forwarding(&mut self, enabled: bool) {
        self.multicast_forwarding = enabled;
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl RoutingTable for StaticRoutingTable {
    fn find_best_matching_route(&self, dest: Ipv4Addr) -> Option<Route> {
        let mut best: Option<&Route> = None;
        for route in self.routes.iter().filter(|r| r.matches(dest)) {
            best = match best {
                None => Some(route),
                Some(current) => {
                    let (len, cur_len) = (prefix_length(route.netmask), prefix_length(current.netmask));
                    if len > cur_len || (len == cur_len && route.metric < current.metric) {
                        Some(route)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best.cloned()
    }

    fn find_best_matching_multicast_route(&self, origin: Ipv4Addr, group: Ipv4Addr) -> Option<MulticastRoute> {
        let mut best: Option<&MulticastRoute> = None;
        for route in self.multicast_routes.iter().filter(|r| r.matches(origin, group)) {
            if best.map_or(true, |current| route.specificity() > current.specificity()) {
                best = Some(route);
            }
        }
        best.cloned()
    }

    fn is_local_address(&self, addr: Ipv4Addr) -> bool {
        self.local_addresses.iter().any(|local| local.address == addr)
    }

    fn is_forwarding_enabled(&self) -> bool {
        self.forwarding
    }

    fn is_multicast_forwarding_enabled(&self) -> bool {
        self.multicast_forwarding
    }

    fn interface_by_local_broadcast_address(&self, addr: Ipv4Addr) -> Option<InterfaceId> {
        self.local_addresses
            .iter()
            .find(|local| local.broadcast == Some(addr))
            .map(|local| local.interface)
    }

    fn interface_by_address(&self, addr: Ipv4Addr) -> Option<InterfaceId> {
        self.local_addresses
            .iter()
            .find(|local| local.address == addr)
            .map(|local| local.interface)
    }
}
