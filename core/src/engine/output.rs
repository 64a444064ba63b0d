//! Outbound path: encapsulation, LOCALOUT, routing, FORWARD, POSTROUTING, fragmentation

use std::net::Ipv4Addr;
use tracing::{debug, trace, warn};

use super::{EngineError, EngineOutput, NetworkProtocol, Transmission};
use crate::datagram::{is_link_local_multicast, Datagram, RoutingDirective, UpperLayerPacket};
use crate::fragment::split;
use crate::hooks::{HookContext, HookStage};
use crate::icmp::{ErrorReporter, IcmpError, UnreachableCode};
use crate::routing::{
    classify_origin, plan_multicast_forward, resolve_unicast, select_multicast_interface, MulticastPlan, OriginDecision,
};
use crate::tables::{InterfaceEntry, InterfaceId, InterfaceTable, RoutingTable};

/// The interface fields transmission needs, copied out of the table
#[derive(Debug, Clone, Copy)]
struct Port {
    id: InterfaceId,
    mtu: usize,
    loopback: bool,
    address: Ipv4Addr,
}

impl From<&InterfaceEntry> for Port {
    fn from(ie: &InterfaceEntry) -> Self {
        Self {
            id: ie.id,
            mtu: ie.mtu,
            loopback: ie.loopback,
            address: ie.address,
        }
    }
}

impl<I, R, E> NetworkProtocol<I, R, E>
where
    I: InterfaceTable,
    R: RoutingTable,
    E: ErrorReporter,
{
    /// Encapsulate an upper-layer packet and send it
    pub fn send_packet(&mut self, packet: UpperLayerPacket, now: u64) -> Result<(), EngineError> {
        self.clock = now;
        if self.interfaces.interface_count() == 0 {
            warn!("No interfaces exist, dropping packet");
            self.stats.dropped_admin += 1;
            return Ok(());
        }
        if let Some(interface) = packet.control.interface {
            self.ensure_interface(interface)?;
        }
        let datagram = self.encapsulate(packet)?;
        self.local_out(datagram);
        Ok(())
    }

    /// Send a ready-made datagram, e.g. one built by a source-routing protocol
    ///
    /// A `directive` replaces the one the datagram carries.
    pub fn send_datagram(
        &mut self,
        mut datagram: Datagram,
        directive: Option<RoutingDirective>,
        now: u64,
    ) -> Result<(), EngineError> {
        self.clock = now;
        if self.interfaces.interface_count() == 0 {
            warn!("No interfaces exist, dropping {}", datagram);
            self.stats.dropped_admin += 1;
            return Ok(());
        }
        if directive.is_some() {
            datagram.directive = directive;
        }
        if let Some(interface) = datagram.directive.as_ref().and_then(|d| d.interface) {
            self.ensure_interface(interface)?;
        }
        datagram.arrival = None;
        self.local_out(datagram);
        Ok(())
    }

    fn encapsulate(&mut self, packet: UpperLayerPacket) -> Result<Datagram, EngineError> {
        let UpperLayerPacket {
            control,
            payload,
            inner,
        } = packet;

        // Unspecified source: the outgoing interface's address is filled in later
        if !control.src.is_unspecified() && self.routes.interface_by_address(control.src).is_none() {
            return Err(EngineError::UnknownSourceAddress(control.src));
        }

        let ttl = if control.ttl > 0 {
            control.ttl
        } else if is_link_local_multicast(control.dest) {
            1
        } else if control.dest.is_multicast() {
            self.config.default_multicast_ttl
        } else {
            self.config.default_ttl
        };

        let identification = self.next_identification;
        self.next_identification = self.next_identification.wrapping_add(1);

        let mut datagram = Datagram::new(control.src, control.dest, control.protocol, payload)
            .with_ttl(ttl)
            .with_identification(identification)
            .with_dont_fragment(control.dont_fragment)
            .with_directive(RoutingDirective {
                interface: control.interface,
                next_hop: control.next_hop,
                multicast_loop: control.multicast_loop,
            });
        datagram.tos = control.tos;
        if let Some(inner) = inner {
            datagram = datagram.with_inner(inner);
        }
        Ok(datagram)
    }

    fn local_out(&mut self, datagram: Datagram) {
        let (interface, next_hop) = datagram
            .directive
            .as_ref()
            .map_or((None, None), |d| (d.interface, d.next_hop));
        let ctx = HookContext {
            in_interface: None,
            out_interface: interface,
            next_hop: next_hop.unwrap_or(Ipv4Addr::UNSPECIFIED),
        };
        if let Some((datagram, ctx)) = self.run_hooks(HookStage::LocalOut, datagram, ctx) {
            self.local_out_finish(datagram, ctx);
        }
    }

    /// Route an originated datagram; `ctx` carries the interface and next hop
    /// requested by the upper layer or chosen by a LOCALOUT hook
    pub(super) fn local_out_finish(&mut self, mut datagram: Datagram, ctx: HookContext) {
        let directive = datagram.directive.take().unwrap_or_default();
        let requested = ctx.out_interface.filter(|id| {
            let known = self.interfaces.interface_by_id(*id).is_some();
            if !known {
                warn!("Requested interface {} does not exist, routing normally", id);
            }
            known
        });
        let next_hop = Some(ctx.next_hop).filter(|nh| !nh.is_unspecified());
        let dest = datagram.dest;

        trace!("Sending {}", datagram);

        if datagram.is_multicast() {
            let chosen = select_multicast_interface(&datagram, requested, &self.interfaces, &self.routes);
            let chosen_is_loopback = chosen
                .and_then(|id| self.interfaces.interface_by_id(id))
                .is_some_and(|ie| ie.loopback);

            if directive.multicast_loop && !chosen_is_loopback {
                if let Some(lo) = self.interfaces.first_loopback_interface().map(|ie| ie.id) {
                    self.fragment_post_routing(datagram.duplicate(), lo, dest);
                }
            }

            match chosen {
                Some(interface) => {
                    self.stats.multicast += 1;
                    self.fragment_post_routing(datagram, interface, dest);
                }
                None => {
                    debug!("No multicast interface, dropping {}", datagram);
                    self.stats.dropped_unroutable += 1;
                }
            }
            return;
        }

        match classify_origin(dest, &self.routes) {
            OriginDecision::Loopback => {
                if requested.is_some() {
                    trace!("Destination {} is local, ignoring requested interface", dest);
                }
                match self.interfaces.first_loopback_interface().map(|ie| ie.id) {
                    Some(lo) => self.fragment_post_routing(datagram, lo, dest),
                    None => {
                        warn!("No loopback interface for local delivery of {}", datagram);
                        self.stats.dropped_unroutable += 1;
                    }
                }
            }
            OriginDecision::Broadcast => self.route_local_broadcast(datagram, requested),
            OriginDecision::Unicast => self.route_unicast(datagram, None, requested, next_hop),
        }
    }

    /// Unicast routing; the FORWARD hook runs only for datagrams that arrived
    /// from an interface
    pub(super) fn route_unicast(
        &mut self,
        datagram: Datagram,
        arrival: Option<InterfaceId>,
        requested: Option<InterfaceId>,
        next_hop: Option<Ipv4Addr>,
    ) {
        let explicit = requested.and_then(|id| self.interfaces.interface_by_id(id));
        let Some(choice) = resolve_unicast(datagram.dest, explicit, next_hop, &self.routes) else {
            debug!("Unroutable {}, sending destination unreachable", datagram);
            self.stats.dropped_unroutable += 1;
            self.report(datagram, IcmpError::DestinationUnreachable(UnreachableCode::Network));
            return;
        };

        let (datagram, next_hop) = match arrival {
            Some(from) => {
                let ctx = HookContext::routed(Some(from), choice.interface, choice.next_hop);
                match self.run_hooks(HookStage::Forward, datagram, ctx) {
                    Some((datagram, ctx)) => (datagram, ctx.next_hop),
                    None => return,
                }
            }
            None => (datagram, choice.next_hop),
        };

        trace!("Output interface {}, next hop {}", choice.interface, next_hop);
        self.stats.forwarded += 1;
        self.fragment_post_routing(datagram, choice.interface, next_hop);
    }

    /// Limited or subnet broadcast originated here
    ///
    /// The next hop is always all-ones so address resolution maps it to the
    /// link broadcast address.
    fn route_local_broadcast(&mut self, datagram: Datagram, requested: Option<InterfaceId>) {
        if let Some(interface) = requested {
            self.fragment_post_routing(datagram, interface, Ipv4Addr::BROADCAST);
        } else if self.config.force_broadcast {
            let all: Vec<InterfaceId> = (0..self.interfaces.interface_count())
                .filter_map(|i| self.interfaces.interface_by_index(i))
                .map(|ie| ie.id)
                .collect();
            for interface in all {
                self.fragment_post_routing(datagram.duplicate(), interface, Ipv4Addr::BROADCAST);
            }
        } else {
            debug!("Broadcast without interface and force_broadcast off, dropping {}", datagram);
            self.stats.dropped_admin += 1;
        }
    }

    pub(super) fn forward_multicast(&mut self, datagram: Datagram, arrival: InterfaceId) {
        trace!("Forwarding multicast {}", datagram);
        self.stats.multicast += 1;

        match plan_multicast_forward(&datagram, arrival, &self.interfaces, &self.routes) {
            MulticastPlan::NoRoute => {
                debug!("No multicast route for {}", datagram);
                self.stats.dropped_unroutable += 1;
            }
            MulticastPlan::WrongParent { expected } => {
                debug!("{} did not arrive on parent interface {}", datagram, expected);
                self.stats.dropped_admin += 1;
            }
            MulticastPlan::NotShortestPath => {
                debug!("{} did not arrive on the shortest path to its source", datagram);
                self.stats.dropped_admin += 1;
            }
            MulticastPlan::Forward { targets, skipped } => {
                self.stats.forwarded += 1;
                self.stats.dropped_admin += skipped as u64;
                let dest = datagram.dest;
                // Only copies leave; the original ends here
                for interface in targets {
                    self.fragment_post_routing(datagram.duplicate(), interface, dest);
                }
            }
        }
    }

    pub(super) fn fragment_post_routing(&mut self, datagram: Datagram, interface: InterfaceId, next_hop: Ipv4Addr) {
        let ctx = HookContext::routed(datagram.arrival, interface, next_hop);
        if let Some((datagram, ctx)) = self.run_hooks(HookStage::PostRouting, datagram, ctx) {
            self.fragment_and_send(datagram, interface, ctx.next_hop);
        }
    }

    pub(super) fn fragment_and_send(&mut self, mut datagram: Datagram, interface: InterfaceId, next_hop: Ipv4Addr) {
        let Some(port) = self.interfaces.interface_by_id(interface).map(Port::from) else {
            warn!("Output interface {} does not exist, dropping {}", interface, datagram);
            self.stats.dropped_admin += 1;
            return;
        };

        if datagram.src.is_unspecified() {
            datagram.src = port.address;
        }

        // Loopback delivery does not count as a hop
        if !port.loopback {
            if datagram.ttl == 0 {
                debug!("TTL exhausted for {}, sending time exceeded", datagram);
                self.stats.dropped_hop_limit += 1;
                self.report(datagram, IcmpError::TimeExceeded);
                return;
            }
            datagram.ttl -= 1;
        }

        if datagram.byte_length() <= port.mtu {
            self.send_to_output(datagram, port, next_hop);
            return;
        }

        if datagram.dont_fragment {
            debug!("{} exceeds MTU {} with don't-fragment set", datagram, port.mtu);
            self.stats.dropped_fragmentation_required += 1;
            self.report(datagram, IcmpError::DestinationUnreachable(UnreachableCode::FragmentationNeeded));
            return;
        }

        // Never fragment (and then reassemble) on loopback
        if port.loopback {
            self.send_to_output(datagram, port, next_hop);
            return;
        }

        match split(datagram, port.mtu) {
            Ok(fragments) => {
                trace!("Sending {} fragments on {}", fragments.len(), port.id);
                for fragment in fragments {
                    self.send_to_output(fragment, port, next_hop);
                }
            }
            Err(datagram) => {
                warn!("MTU {} of {} cannot carry a fragment of {}", port.mtu, port.id, datagram);
                self.stats.dropped_fragmentation_required += 1;
                self.report(datagram, IcmpError::DestinationUnreachable(UnreachableCode::FragmentationNeeded));
            }
        }
    }

    fn send_to_output(&mut self, datagram: Datagram, port: Port, next_hop: Ipv4Addr) {
        if port.loopback {
            // No link layer behind loopback: arrive again right away
            self.receive(datagram, port.id);
        } else {
            self.outputs.push_back(EngineOutput::Transmit(Transmission {
                interface: port.id,
                next_hop,
                datagram,
            }));
        }
    }
}
