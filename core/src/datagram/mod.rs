//! Datagram model: the unit of work flowing through the forwarding engine
//!
//! A datagram is owned by exactly one stage at a time. Fan-out (multicast,
//! broadcast, loopback copies) goes through [`Datagram::duplicate`], which
//! hands out an independent copy with its own identity.

pub mod address;
pub mod control;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::icmp::IcmpMessage;
use crate::tables::InterfaceId;

pub use address::{is_limited_broadcast, is_link_local_multicast};
pub use control::{ReceiveControl, SendControl, UpperLayerPacket};

/// Default header length in bytes (no options)
pub const HEADER_BYTES: usize = 20;

/// Well-known payload protocol numbers
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const IGMP: u8 = 2;
    /// IP-in-IP tunnelling
    pub const IP_IN_IP: u8 = 4;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    /// Dynamic Source Routing (hands ready datagrams down with a directive)
    pub const DSR: u8 = 48;
}

static NEXT_DATAGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an in-flight datagram, used to re-inject queued datagrams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatagramId(u64);

impl DatagramId {
    fn next() -> Self {
        DatagramId(NEXT_DATAGRAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatagramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Routing instructions attached by an upper layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDirective {
    /// Send through this interface instead of consulting the routing table
    pub interface: Option<InterfaceId>,
    /// Next hop to use with the explicit interface
    pub next_hop: Option<Ipv4Addr>,
    /// Loop a copy of outgoing multicast back to the local host
    pub multicast_loop: bool,
}

impl Default for RoutingDirective {
    fn default() -> Self {
        Self {
            interface: None,
            next_hop: None,
            multicast_loop: true,
        }
    }
}

/// Structured higher-layer unit carried alongside the payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encapsulated {
    /// ICMP message (errors embed the offending datagram)
    Icmp(IcmpMessage),
    /// Tunnelled datagram (IP-in-IP)
    Datagram(Box<Datagram>),
}

/// A network-layer datagram in flight
///
/// `fragment_offset` is expressed in bytes. The opaque `payload` is what
/// fragmentation splits and reassembly joins; the structured `inner` unit
/// travels with the fragment at offset 0 only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    id: DatagramId,
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    pub tos: u8,
    pub identification: u16,
    pub fragment_offset: usize,
    pub more_fragments: bool,
    pub dont_fragment: bool,
    pub header_length: usize,
    pub payload: Vec<u8>,
    pub inner: Option<Box<Encapsulated>>,
    pub directive: Option<RoutingDirective>,
    /// Interface the datagram arrived on (None for locally originated)
    pub arrival: Option<InterfaceId>,
    /// Set by the link layer when the frame was received corrupted
    pub bit_error: bool,
}

impl Datagram {
    /// Create a datagram with default header fields and a fresh identity
    pub fn new(src: Ipv4Addr, dest: Ipv4Addr, protocol: u8, payload: Vec<u8>) -> Self {
        Self {
            id: DatagramId::next(),
            src,
            dest,
            protocol,
            ttl: 32,
            tos: 0,
            identification: 0,
            fragment_offset: 0,
            more_fragments: false,
            dont_fragment: false,
            header_length: HEADER_BYTES,
            payload,
            inner: None,
            directive: None,
            arrival: None,
            bit_error: false,
        }
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_identification(mut self, identification: u16) -> Self {
        self.identification = identification;
        self
    }

    pub fn with_dont_fragment(mut self, dont_fragment: bool) -> Self {
        self.dont_fragment = dont_fragment;
        self
    }

    pub fn with_directive(mut self, directive: RoutingDirective) -> Self {
        self.directive = Some(directive);
        self
    }

    pub fn with_inner(mut self, inner: Encapsulated) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn id(&self) -> DatagramId {
        self.id
    }

    /// Independent copy with its own identity
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.id = DatagramId::next();
        copy
    }

    /// Header plus payload
    pub fn byte_length(&self) -> usize {
        self.header_length + self.payload.len()
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment_offset != 0 || self.more_fragments
    }

    pub fn is_multicast(&self) -> bool {
        self.dest.is_multicast()
    }
}

impl fmt::Display for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} proto={} ttl={} len={}",
            self.id,
            self.src,
            self.dest,
            self.protocol,
            self.ttl,
            self.byte_length()
        )?;
        if self.is_fragment() {
            write!(
                f,
                " frag(id={} off={} mf={})",
                self.identification, self.fragment_offset, self.more_fragments
            )?;
        }
        Ok(())
    }
}
