//! Multicast forwarding and outgoing-interface selection

use tracing::trace;

use crate::datagram::Datagram;
use crate::tables::{InterfaceId, InterfaceTable, RoutingTable};

/// Outcome of the multicast forwarding decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MulticastPlan {
    /// No (origin, group) route
    NoRoute,
    /// Reverse-path check failed against the route's parent interface
    WrongParent { expected: InterfaceId },
    /// No parent recorded and the arrival is not on the shortest path to the source
    NotShortestPath,
    /// Send one copy per target; `skipped` children were excluded by policy
    Forward { targets: Vec<InterfaceId>, skipped: usize },
}

/// Decide where an arriving multicast datagram is copied to
///
/// Children are excluded when they are the arrival interface, when the
/// datagram's TTL is at or below the child's threshold, or when the child is
/// a leaf without listeners for the group. Only the last two count as skipped.
pub fn plan_multicast_forward(
    datagram: &Datagram,
    arrival: InterfaceId,
    interfaces: &dyn InterfaceTable,
    routes: &dyn RoutingTable,
) -> MulticastPlan {
    let group = datagram.dest;
    let Some(route) = routes.find_best_matching_multicast_route(datagram.src, group) else {
        return MulticastPlan::NoRoute;
    };

    match route.parent {
        Some(parent) if parent != arrival => return MulticastPlan::WrongParent { expected: parent },
        None if routes.interface_for_dest_addr(datagram.src) != Some(arrival) => {
            return MulticastPlan::NotShortestPath;
        }
        _ => {}
    }

    let mut targets = Vec::with_capacity(route.children.len());
    let mut skipped = 0;
    for child in route.children.iter().filter(|c| c.interface != arrival) {
        let Some(ie) = interfaces.interface_by_id(child.interface) else {
            trace!("Multicast child {} is not a known interface", child.interface);
            skipped += 1;
            continue;
        };
        if datagram.ttl <= ie.multicast_ttl_threshold {
            trace!("Not forwarding to {} (ttl threshold reached)", ie.name);
            skipped += 1;
        } else if child.leaf && !ie.has_multicast_listener(group) {
            trace!("Not forwarding to {} (no listeners)", ie.name);
            skipped += 1;
        } else {
            targets.push(ie.id);
        }
    }
    MulticastPlan::Forward { targets, skipped }
}

/// Pick the outgoing interface for originated multicast
///
/// First hit wins: the requested interface, the best unicast route toward
/// the group, the interface owning the source address, the first
/// multicast-capable interface.
pub fn select_multicast_interface(
    datagram: &Datagram,
    requested: Option<InterfaceId>,
    interfaces: &dyn InterfaceTable,
    routes: &dyn RoutingTable,
) -> Option<InterfaceId> {
    requested
        .filter(|id| interfaces.interface_by_id(*id).is_some())
        .or_else(|| routes.find_best_matching_route(datagram.dest).map(|r| r.interface))
        .or_else(|| routes.interface_by_address(datagram.src))
        .or_else(|| interfaces.first_multicast_interface().map(|ie| ie.id))
}
