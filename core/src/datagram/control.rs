//! Control information exchanged with upper-layer protocols

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::{Datagram, Encapsulated};
use crate::tables::InterfaceId;

/// Parameters an upper layer supplies when handing a packet down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendControl {
    pub protocol: u8,
    /// Unspecified means "use the outgoing interface's address"
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub tos: u8,
    /// 0 selects the configured default
    pub ttl: u8,
    pub dont_fragment: bool,
    /// Multicast interface option / explicit outgoing interface
    pub interface: Option<InterfaceId>,
    pub next_hop: Option<Ipv4Addr>,
    pub multicast_loop: bool,
}

impl SendControl {
    pub fn new(protocol: u8, dest: Ipv4Addr) -> Self {
        Self {
            protocol,
            src: Ipv4Addr::UNSPECIFIED,
            dest,
            tos: 0,
            ttl: 0,
            dont_fragment: false,
            interface: None,
            next_hop: None,
            multicast_loop: true,
        }
    }
}

/// A transport-layer unit waiting to be encapsulated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpperLayerPacket {
    pub control: SendControl,
    pub payload: Vec<u8>,
    pub inner: Option<Encapsulated>,
}

impl UpperLayerPacket {
    pub fn new(control: SendControl, payload: Vec<u8>) -> Self {
        Self {
            control,
            payload,
            inner: None,
        }
    }
}

/// Metadata attached to a locally delivered unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiveControl {
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub tos: u8,
    pub interface: Option<InterfaceId>,
    pub ttl: u8,
}

impl ReceiveControl {
    pub fn from_datagram(datagram: &Datagram) -> Self {
        Self {
            protocol: datagram.protocol,
            src: datagram.src,
            dest: datagram.dest,
            tos: datagram.tos,
            interface: datagram.arrival,
            ttl: datagram.ttl,
        }
    }
}
