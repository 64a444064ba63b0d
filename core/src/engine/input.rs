//! Arrival path: bit-error check, PREROUTING, routing, reassembly, LOCALIN, delivery

use rand::Rng;
use std::net::Ipv4Addr;
use tracing::{debug, trace, warn};

use super::{Delivery, EngineError, EngineOutput, NetworkProtocol};
use crate::datagram::{protocol, Datagram, Encapsulated, ReceiveControl};
use crate::fragment::PURGE_INTERVAL_MS;
use crate::hooks::{HookContext, HookStage};
use crate::icmp::{ErrorReporter, IcmpError, UnreachableCode};
use crate::routing::{classify_arrival, ArrivalDecision};
use crate::tables::{InterfaceId, InterfaceTable, RoutingTable};

impl<I, R, E> NetworkProtocol<I, R, E>
where
    I: InterfaceTable,
    R: RoutingTable,
    E: ErrorReporter,
{
    /// A datagram arrived on `interface`
    pub fn handle_packet_from_network(
        &mut self,
        datagram: Datagram,
        interface: InterfaceId,
        now: u64,
    ) -> Result<(), EngineError> {
        self.clock = now;
        self.ensure_interface(interface)?;
        self.receive(datagram, interface);
        Ok(())
    }

    pub(super) fn receive(&mut self, mut datagram: Datagram, interface: InterfaceId) {
        datagram.arrival = Some(interface);

        // Header bit error probability = header length / total length
        if datagram.bit_error {
            let relative_header = datagram.header_length as f64 / datagram.byte_length().max(1) as f64;
            if self.rng.gen::<f64>() <= relative_header {
                debug!("Bit error in header of {}, sending parameter problem", datagram);
                self.stats.dropped_malformed += 1;
                self.report(datagram, IcmpError::ParameterProblem);
                return;
            }
        }

        trace!("Received {} on {}", datagram, interface);

        let ctx = HookContext::incoming(Some(interface));
        if let Some((datagram, _)) = self.run_hooks(HookStage::PreRouting, datagram, ctx) {
            self.prerouting_finish(datagram, interface);
        }
    }

    pub(super) fn prerouting_finish(&mut self, datagram: Datagram, interface: InterfaceId) {
        let Some(arrival) = self.interfaces.interface_by_id(interface) else {
            warn!("Interface {} disappeared, dropping {}", interface, datagram);
            self.stats.dropped_admin += 1;
            return;
        };

        match classify_arrival(&datagram, arrival, &self.routes) {
            ArrivalDecision::Deliver => self.reassemble_and_deliver(datagram),
            ArrivalDecision::Multicast { deliver_copy, forward } => {
                if deliver_copy {
                    self.reassemble_and_deliver(datagram.duplicate());
                }
                if forward {
                    self.forward_multicast(datagram, interface);
                } else {
                    trace!("Not forwarding multicast {}", datagram);
                }
            }
            ArrivalDecision::Broadcast { rebroadcast_on } => {
                if let Some(subnet) = rebroadcast_on {
                    self.fragment_post_routing(datagram.duplicate(), subnet, Ipv4Addr::BROADCAST);
                }
                trace!("Broadcast received");
                self.reassemble_and_deliver(datagram);
            }
            ArrivalDecision::ForwardingDisabled => {
                debug!("Forwarding off, dropping {}", datagram);
                self.stats.dropped_admin += 1;
            }
            ArrivalDecision::Forward => self.route_unicast(datagram, Some(interface), None, None),
        }
    }

    fn reassemble_and_deliver(&mut self, datagram: Datagram) {
        if datagram.src.is_unspecified() {
            trace!("Received {} without source address filled in", datagram);
        }

        let datagram = if datagram.is_fragment() {
            self.purge_stale_fragments();
            if self.fragments.expire(&datagram, self.stale_before()) {
                self.stats.dropped_reassembly += 1;
            }
            match self.fragments.add_fragment(datagram, self.clock) {
                Ok(Some(whole)) => {
                    trace!("Fragment completes {}", whole);
                    whole
                }
                Ok(None) => return,
                Err(err) => {
                    debug!("Reassembly entry discarded: {}", err);
                    self.stats.dropped_reassembly += 1;
                    return;
                }
            }
        } else {
            datagram
        };

        let ctx = HookContext::incoming(datagram.arrival);
        if let Some((datagram, _)) = self.run_hooks(HookStage::LocalIn, datagram, ctx) {
            self.deliver_finish(datagram);
        }
    }

    /// Sweep expired reassembly entries, at most once per interval
    fn purge_stale_fragments(&mut self) {
        if self.clock < self.last_purge.saturating_add(PURGE_INTERVAL_MS) {
            return;
        }
        self.last_purge = self.clock;
        let purged = self.fragments.purge_stale(self.stale_before());
        self.stats.dropped_reassembly += purged as u64;
    }

    /// Reassembly entries started before this time have timed out
    fn stale_before(&self) -> u64 {
        self.clock.saturating_sub(self.config.fragment_timeout_ms)
    }

    pub(super) fn deliver_finish(&mut self, datagram: Datagram) {
        match datagram.protocol {
            protocol::ICMP => {
                // Errors go to the protocol of the datagram they are about
                let consumer = match datagram.inner.as_deref() {
                    Some(Encapsulated::Icmp(msg)) if msg.icmp_type.is_error() => {
                        msg.original.as_ref().map_or(protocol::ICMP, |original| original.protocol)
                    }
                    _ => protocol::ICMP,
                };
                self.deliver(datagram, consumer);
            }
            protocol::IP_IN_IP => self.decapsulate_tunnel(datagram),
            p if self.protocols.contains(&p) => self.deliver(datagram, p),
            p => {
                debug!("No consumer for protocol {}, discarding {}", p, datagram);
                self.stats.dropped_protocol_unreachable += 1;
                self.report(datagram, IcmpError::DestinationUnreachable(UnreachableCode::Protocol));
            }
        }
    }

    fn deliver(&mut self, datagram: Datagram, consumer: u8) {
        let control = ReceiveControl::from_datagram(&datagram);
        trace!("Delivering {} to protocol {}", datagram, consumer);
        self.stats.local_delivered += 1;
        self.outputs.push_back(EngineOutput::Deliver(Delivery {
            protocol: consumer,
            control,
            payload: datagram.payload,
            inner: datagram.inner.map(|inner| *inner),
        }));
    }

    /// IP-in-IP: the inner datagram arrives again on the same interface
    fn decapsulate_tunnel(&mut self, mut datagram: Datagram) {
        let interface = datagram.arrival;
        match (datagram.inner.take().map(|inner| *inner), interface) {
            (Some(Encapsulated::Datagram(inner)), Some(interface)) => {
                trace!("Decapsulated tunnelled {}", inner);
                self.receive(*inner, interface);
            }
            _ => {
                debug!("Tunnel datagram {} carries no inner datagram", datagram);
                self.stats.dropped_malformed += 1;
                self.report(datagram, IcmpError::ParameterProblem);
            }
        }
    }
}
