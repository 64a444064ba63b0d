//! Network interfaces: attachment points with MTU, flags and group state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::datagram::address::directed_broadcast;

/// Stable interface identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

fn default_true() -> bool {
    true
}

fn default_unspecified() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

/// One network attachment point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceEntry {
    pub id: InterfaceId,
    pub name: String,
    pub mtu: usize,
    #[serde(default)]
    pub loopback: bool,
    #[serde(default = "default_true")]
    pub broadcast: bool,
    #[serde(default)]
    pub multicast: bool,
    /// Unspecified until address acquisition completes
    #[serde(default = "default_unspecified")]
    pub address: Ipv4Addr,
    #[serde(default = "default_unspecified")]
    pub netmask: Ipv4Addr,
    /// Groups this host has joined on the interface
    #[serde(default)]
    pub multicast_groups: Vec<Ipv4Addr>,
    /// Groups with listeners on the attached link (router view)
    #[serde(default)]
    pub multicast_listeners: Vec<Ipv4Addr>,
    /// Multicast is only forwarded here if TTL is above this value
    #[serde(default)]
    pub multicast_ttl_threshold: u8,
}

impl InterfaceEntry {
    /// Broadcast-capable interface without an address
    pub fn new(id: u32, name: &str, mtu: usize) -> Self {
        Self {
            id: InterfaceId(id),
            name: name.to_string(),
            mtu,
            loopback: false,
            broadcast: true,
            multicast: false,
            address: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            multicast_groups: Vec::new(),
            multicast_listeners: Vec::new(),
            multicast_ttl_threshold: 0,
        }
    }

    /// Loopback interface with 127.0.0.1/8
    pub fn loopback(id: u32) -> Self {
        Self {
            loopback: true,
            broadcast: false,
            address: Ipv4Addr::LOCALHOST,
            netmask: Ipv4Addr::new(255, 0, 0, 0),
            ..Self::new(id, "lo0", 65_535)
        }
    }

    pub fn with_address(mut self, address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        self.address = address;
        self.netmask = netmask;
        self
    }

    pub fn with_multicast(mut self) -> Self {
        self.multicast = true;
        self
    }

    pub fn with_ttl_threshold(mut self, threshold: u8) -> Self {
        self.multicast_ttl_threshold = threshold;
        self
    }

    pub fn join_group(&mut self, group: Ipv4Addr) {
        if !self.multicast_groups.contains(&group) {
            self.multicast_groups.push(group);
        }
    }

    pub fn add_listener(&mut self, group: Ipv4Addr) {
        if !self.multicast_listeners.contains(&group) {
            self.multicast_listeners.push(group);
        }
    }

    pub fn is_member_of_multicast_group(&self, group: Ipv4Addr) -> bool {
        self.multicast_groups.contains(&group)
    }

    pub fn has_multicast_listener(&self, group: Ipv4Addr) -> bool {
        self.multicast_listeners.contains(&group)
    }

    pub fn has_address(&self) -> bool {
        !self.address.is_unspecified()
    }

    /// Subnet broadcast address, if the interface is configured for one
    pub fn local_broadcast_address(&self) -> Option<Ipv4Addr> {
        if !self.broadcast || !self.has_address() || self.netmask.is_unspecified() {
            return None;
        }
        Some(directed_broadcast(self.address, self.netmask))
    }
}

/// Read-only view of the host's interfaces
pub trait InterfaceTable {
    fn interface_count(&self) -> usize;

    fn interface_by_index(&self, index: usize) -> Option<&InterfaceEntry>;

    fn interface_by_id(&self, id: InterfaceId) -> Option<&InterfaceEntry> {
        (0..self.interface_count())
            .filter_map(|i| self.interface_by_index(i))
            .find(|ie| ie.id == id)
    }

    fn first_loopback_interface(&self) -> Option<&InterfaceEntry> {
        (0..self.interface_count())
            .filter_map(|i| self.interface_by_index(i))
            .find(|ie| ie.loopback)
    }

    fn first_multicast_interface(&self) -> Option<&InterfaceEntry> {
        (0..self.interface_count())
            .filter_map(|i| self.interface_by_index(i))
            .find(|ie| ie.multicast && !ie.loopback)
    }
}

/// Vector-backed interface table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticInterfaceTable {
    entries: Vec<InterfaceEntry>,
}

impl StaticInterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<InterfaceEntry>) -> Self {
        Self { entries }
    }

    /// Replaces an entry with the same id
    pub fn add(&mut self, entry: InterfaceEntry) {
        match self.entries.iter_mut().find(|ie| ie.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get_mut(&mut self, id: InterfaceId) -> Option<&mut InterfaceEntry> {
        self.entries.iter_mut().find(|ie| ie.id == id)
    }

    pub fn entries(&self) -> &[InterfaceEntry] {
        &self.entries
    }
}

impl InterfaceTable for StaticInterfaceTable {
    fn interface_count(&self) -> usize {
        self.entries.len()
    }

    fn interface_by_index(&self, index: usize) -> Option<&InterfaceEntry> {
        self.entries.get(index)
    }

    fn interface_by_id(&self, id: InterfaceId) -> Option<&InterfaceEntry> {
        self.entries.iter().find(|ie| ie.id == id)
    }
}
