//! Per-instance datagram counters

use serde::Serialize;

/// What happened to datagrams handled by one engine instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    pub forwarded: u64,
    pub local_delivered: u64,
    pub multicast: u64,
    pub dropped_malformed: u64,
    pub dropped_unroutable: u64,
    pub dropped_admin: u64,
    pub dropped_hop_limit: u64,
    pub dropped_fragmentation_required: u64,
    pub dropped_protocol_unreachable: u64,
    pub dropped_by_hook: u64,
    pub dropped_reassembly: u64,
}

impl ProtocolStats {
    /// Every drop except unroutable ones
    pub fn dropped(&self) -> u64 {
        self.dropped_malformed
            + self.dropped_admin
            + self.dropped_hop_limit
            + self.dropped_fragmentation_required
            + self.dropped_protocol_unreachable
            + self.dropped_by_hook
            + self.dropped_reassembly
    }

    /// Compact one-line form, e.g. `fwd:3 up:1 DROP:2`; zero counters are left out
    pub fn summary(&self) -> String {
        [
            ("fwd", self.forwarded),
            ("up", self.local_delivered),
            ("mcast", self.multicast),
            ("DROP", self.dropped()),
            ("UNROUTABLE", self.dropped_unroutable),
        ]
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| format!("{}:{}", label, n))
        .collect::<Vec<_>>()
        .join(" ")
    }
}
