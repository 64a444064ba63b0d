//! Routing Decision Engine
//!
//! Pure decision functions over the interface and routing tables. They never
//! touch a datagram's ownership; the orchestrator acts on what they return.
//!
//! Decision order for an arriving datagram:
//! 1. Arrived on loopback → deliver locally
//! 2. Multicast destination → local copy for members, then multicast forwarding
//! 3. Local address (or arrival interface still unaddressed) → deliver locally
//! 4. Limited or subnet broadcast → deliver locally, re-broadcast on the subnet if routing
//! 5. Forwarding disabled → administrative drop
//! 6. Otherwise → best-match unicast route

pub mod multicast;
pub mod unicast;

pub use multicast::{plan_multicast_forward, select_multicast_interface, MulticastPlan};
pub use unicast::{classify_arrival, classify_origin, resolve_unicast, ArrivalDecision, NextHopChoice, OriginDecision};
