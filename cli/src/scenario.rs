// Simulation scenarios
//
// A scenario is a JSON file describing one node: its interfaces and routes,
// plus a timeline of datagrams arriving from the network and packets sent by
// local upper layers.

use anyhow::{Context, Result};
use netlayer_core::{
    protocol, Datagram, EngineConfig, IcmpReporter, InterfaceEntry, InterfaceId, MulticastRoute, NetworkProtocol,
    Route, SendControl, StaticInterfaceTable, StaticNetworkProtocol, StaticRoutingTable, UpperLayerPacket,
};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,

    /// Overrides the engine settings from the CLI config
    #[serde(default)]
    pub config: Option<EngineConfig>,

    #[serde(default)]
    pub forwarding: bool,

    #[serde(default)]
    pub multicast_forwarding: bool,

    pub interfaces: Vec<InterfaceEntry>,

    /// Extra routes on top of the connected ones
    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default)]
    pub multicast_routes: Vec<MulticastRoute>,

    #[serde(default)]
    pub events: Vec<Event>,
}

/// One step of the timeline
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A datagram arrives on an interface
    Arrive {
        #[serde(default)]
        at_ms: u64,
        interface: InterfaceId,
        datagram: DatagramSpec,
    },
    /// A local upper layer sends a packet
    Send {
        #[serde(default)]
        at_ms: u64,
        packet: PacketSpec,
    },
}

impl Event {
    pub fn at_ms(&self) -> u64 {
        match self {
            Event::Arrive { at_ms, .. } | Event::Send { at_ms, .. } => *at_ms,
        }
    }
}

fn default_protocol() -> u8 {
    protocol::UDP
}

fn default_ttl() -> u8 {
    64
}

fn default_true() -> bool {
    true
}

fn unspecified() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

/// Header fields of an arriving datagram; the payload is `length` zero bytes
#[derive(Debug, Clone, Deserialize)]
pub struct DatagramSpec {
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    #[serde(default = "default_protocol")]
    pub protocol: u8,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub identification: u16,
    #[serde(default)]
    pub fragment_offset: usize,
    #[serde(default)]
    pub more_fragments: bool,
    #[serde(default)]
    pub dont_fragment: bool,
    /// Corrupted in transit; the header check may catch it
    #[serde(default)]
    pub bit_error: bool,
}

impl DatagramSpec {
    pub fn build(&self) -> Datagram {
        let mut datagram = Datagram::new(self.src, self.dest, self.protocol, vec![0; self.length])
            .with_ttl(self.ttl)
            .with_identification(self.identification)
            .with_dont_fragment(self.dont_fragment);
        datagram.fragment_offset = self.fragment_offset;
        datagram.more_fragments = self.more_fragments;
        datagram.bit_error = self.bit_error;
        datagram
    }
}

/// Send request from an upper layer; TTL 0 picks the configured default
#[derive(Debug, Clone, Deserialize)]
pub struct PacketSpec {
    pub dest: Ipv4Addr,
    #[serde(default = "unspecified")]
    pub src: Ipv4Addr,
    #[serde(default = "default_protocol")]
    pub protocol: u8,
    #[serde(default)]
    pub ttl: u8,
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub interface: Option<InterfaceId>,
    #[serde(default)]
    pub next_hop: Option<Ipv4Addr>,
    #[serde(default)]
    pub dont_fragment: bool,
    #[serde(default = "default_true")]
    pub multicast_loop: bool,
}

impl PacketSpec {
    pub fn build(&self) -> UpperLayerPacket {
        let mut control = SendControl::new(self.protocol, self.dest);
        control.src = self.src;
        control.ttl = self.ttl;
        control.interface = self.interface;
        control.next_hop = self.next_hop;
        control.dont_fragment = self.dont_fragment;
        control.multicast_loop = self.multicast_loop;
        UpperLayerPacket::new(control, vec![0; self.length])
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut scenario: Scenario = serde_json::from_str(json).context("Failed to parse scenario")?;
        if scenario.interfaces.is_empty() {
            anyhow::bail!("Scenario has no interfaces");
        }
        // Stable: events at the same time keep file order
        scenario.events.sort_by_key(Event::at_ms);
        Ok(scenario)
    }

    /// Build the engine; `fallback` is used when the scenario has no config
    pub fn build_engine(&self, fallback: &EngineConfig) -> Result<StaticNetworkProtocol> {
        let config = self.config.clone().unwrap_or_else(|| fallback.clone());
        let interfaces = StaticInterfaceTable::from_entries(self.interfaces.clone());

        let mut routes = StaticRoutingTable::from_interfaces(&interfaces);
        routes.set_forwarding(self.forwarding);
        routes.set_multicast_forwarding(self.multicast_forwarding);
        for route in &self.routes {
            routes.add_route(route.clone());
        }
        for route in &self.multicast_routes {
            routes.add_multicast_route(route.clone());
        }

        NetworkProtocol::new(config, interfaces, routes, IcmpReporter::new()).context("Failed to build engine")
    }
}
