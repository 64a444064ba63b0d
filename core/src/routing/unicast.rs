//! Unicast and broadcast decisions

use std::net::Ipv4Addr;
use tracing::trace;

use crate::datagram::{is_limited_broadcast, is_link_local_multicast, protocol, Datagram};
use crate::tables::{InterfaceEntry, InterfaceId, RoutingTable};

/// What to do with a datagram once pre-routing accepted it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalDecision {
    /// Hand to the local delivery path
    Deliver,
    /// Multicast: optionally deliver a copy here, optionally forward
    Multicast { deliver_copy: bool, forward: bool },
    /// Broadcast: deliver here, and re-broadcast on a subnet we route for
    Broadcast { rebroadcast_on: Option<InterfaceId> },
    /// Not ours and forwarding is off
    ForwardingDisabled,
    /// Look up a unicast route
    Forward,
}

/// Classify an arriving datagram
pub fn classify_arrival(datagram: &Datagram, arrival: &InterfaceEntry, routes: &dyn RoutingTable) -> ArrivalDecision {
    let dest = datagram.dest;

    if arrival.loopback {
        return ArrivalDecision::Deliver;
    }

    if datagram.is_multicast() {
        // Multicast routers take group-management traffic even without membership
        let deliver_copy = arrival.is_member_of_multicast_group(dest)
            || (routes.is_multicast_forwarding_enabled() && datagram.protocol == protocol::IGMP);
        let forward = routes.is_forwarding_enabled() && !is_link_local_multicast(dest) && datagram.ttl != 0;
        return ArrivalDecision::Multicast { deliver_copy, forward };
    }

    // Unaddressed interfaces accept everything (address acquisition in progress)
    if routes.is_local_address(dest) || !arrival.has_address() {
        return ArrivalDecision::Deliver;
    }

    let subnet = routes.interface_by_local_broadcast_address(dest);
    if is_limited_broadcast(dest) || subnet.is_some() {
        let rebroadcast_on = subnet.filter(|ie| *ie != arrival.id && routes.is_forwarding_enabled());
        return ArrivalDecision::Broadcast { rebroadcast_on };
    }

    if !routes.is_forwarding_enabled() {
        return ArrivalDecision::ForwardingDisabled;
    }
    ArrivalDecision::Forward
}

/// Path class of a locally originated non-multicast datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDecision {
    /// Addressed to this host: goes through the loopback interface
    Loopback,
    /// Limited or subnet broadcast
    Broadcast,
    /// Regular unicast routing
    Unicast,
}

pub fn classify_origin(dest: Ipv4Addr, routes: &dyn RoutingTable) -> OriginDecision {
    if routes.is_local_address(dest) {
        OriginDecision::Loopback
    } else if is_limited_broadcast(dest) || routes.is_local_broadcast_address(dest) {
        OriginDecision::Broadcast
    } else {
        OriginDecision::Unicast
    }
}

/// Outgoing interface plus next hop for a unicast datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHopChoice {
    pub interface: InterfaceId,
    /// Unspecified means "the destination is on-link"
    pub next_hop: Ipv4Addr,
}

/// Resolve where a unicast datagram goes
///
/// An explicit interface wins over the routing table. Its next hop is the
/// explicit one if given; on a broadcast-capable interface the gateway of
/// the best route is borrowed when that route uses the same interface.
pub fn resolve_unicast(
    dest: Ipv4Addr,
    explicit: Option<&InterfaceEntry>,
    explicit_next_hop: Option<Ipv4Addr>,
    routes: &dyn RoutingTable,
) -> Option<NextHopChoice> {
    match explicit {
        Some(ie) => {
            let next_hop = match explicit_next_hop.filter(|nh| !nh.is_unspecified()) {
                Some(nh) => nh,
                None if ie.broadcast => routes
                    .find_best_matching_route(dest)
                    .filter(|route| route.interface == ie.id)
                    .map_or(Ipv4Addr::UNSPECIFIED, |route| route.gateway),
                None => Ipv4Addr::UNSPECIFIED,
            };
            trace!("Using explicit output interface {} for {}", ie.id, dest);
            Some(NextHopChoice {
                interface: ie.id,
                next_hop,
            })
        }
        None => routes.find_best_matching_route(dest).map(|route| NextHopChoice {
            interface: route.interface,
            next_hop: route.gateway,
        }),
    }
}
