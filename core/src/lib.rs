// Netlayer Core: generic network-layer forwarding engine
//
// Datagrams come in from interfaces or from local upper layers. The engine
// decides: deliver here, forward, fragment, or drop. Hooks may look at,
// rewrite, hold or take every datagram at five fixed points along the way.

pub mod datagram;
pub mod engine;
pub mod fragment;
pub mod hooks;
pub mod icmp;
pub mod routing;
pub mod tables;

pub use datagram::{
    protocol, Datagram, DatagramId, Encapsulated, ReceiveControl, RoutingDirective, SendControl, UpperLayerPacket,
};
pub use engine::{
    ConfigError, Delivery, EngineConfig, EngineError, EngineOutput, NetworkProtocol, ProtocolStats, Transmission,
};
pub use fragment::{FragmentBuffer, FragmentError};
pub use hooks::{CaptureHook, HookContext, HookError, HookResult, HookStage, NetfilterHook, Verdict};
pub use icmp::{ErrorReporter, IcmpError, IcmpMessage, IcmpReporter, IcmpType, UnreachableCode};
pub use tables::{
    ChildInterface, InterfaceEntry, InterfaceId, InterfaceTable, MulticastRoute, Route, RoutingTable,
    StaticInterfaceTable, StaticRoutingTable,
};

// ============================================================================
// CONVENIENCE
// ============================================================================

/// Engine over the in-memory tables and the recording ICMP reporter
pub type StaticNetworkProtocol = NetworkProtocol<StaticInterfaceTable, StaticRoutingTable, IcmpReporter>;

impl StaticNetworkProtocol {
    /// Build an engine whose routing table is derived from `interfaces`
    /// (local addresses and connected routes), with forwarding as given
    pub fn with_interfaces(
        config: EngineConfig,
        interfaces: StaticInterfaceTable,
        forwarding: bool,
    ) -> Result<Self, EngineError> {
        let mut routes = StaticRoutingTable::from_interfaces(&interfaces);
        routes.set_forwarding(forwarding);
        NetworkProtocol::new(config, interfaces, routes, IcmpReporter::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_with_interfaces_derives_routes() {
        let interfaces = StaticInterfaceTable::from_entries(vec![
            InterfaceEntry::loopback(0),
            InterfaceEntry::new(1, "eth0", 1500).with_address(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0)),
        ]);
        let engine = StaticNetworkProtocol::with_interfaces(EngineConfig::default(), interfaces, true).unwrap();
        assert!(engine.routes().is_forwarding_enabled());
        assert!(engine.routes().is_local_address(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(engine.routes().route_count(), 1);
        assert_eq!(engine.stats().summary(), "");
    }
}
