//! Netfilter hooks: interception points along the datagram's journey
//!
//! Five stages are exposed:
//! - **PreRouting**: every datagram arriving from an interface, before routing
//! - **LocalIn**: datagrams about to be handed to an upper layer (after reassembly)
//! - **Forward**: datagrams routed through this host to another interface
//! - **PostRouting**: every datagram about to be fragmented and transmitted
//! - **LocalOut**: datagrams submitted by local upper layers, before routing
//!
//! A hook receives the datagram by value and must return it (`Accept`,
//! `Queue`) or give it up (`Drop`, `Stolen`). A queued datagram is parked
//! in the engine's pending table until the hook calls
//! `NetworkProtocol::reinject` with the datagram's id.

pub mod capture;
pub mod chain;
pub mod pending;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::datagram::Datagram;
use crate::tables::InterfaceId;

pub use capture::{CaptureHook, CaptureRecord};
pub use chain::{HookChain, HookRegistration};
pub use pending::{PendingTable, SuspendedDatagram};

/// Interception point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookStage {
    PreRouting,
    LocalIn,
    Forward,
    PostRouting,
    LocalOut,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStage::PreRouting => write!(f, "PREROUTING"),
            HookStage::LocalIn => write!(f, "LOCALIN"),
            HookStage::Forward => write!(f, "FORWARD"),
            HookStage::PostRouting => write!(f, "POSTROUTING"),
            HookStage::LocalOut => write!(f, "LOCALOUT"),
        }
    }
}

/// Verdict tag, also used when re-injecting a queued datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Accept,
    Drop,
    Queue,
    Stolen,
}

/// What a hook did with the datagram it was given
#[derive(Debug)]
pub enum HookResult {
    /// Continue with the next hook (or normal processing)
    Accept(Datagram),
    /// Destroy the datagram
    Drop,
    /// Park the datagram until it is re-injected
    Queue(Datagram),
    /// The hook kept the datagram; the engine forgets about it
    Stolen,
}

impl HookResult {
    pub fn verdict(&self) -> Verdict {
        match self {
            HookResult::Accept(_) => Verdict::Accept,
            HookResult::Drop => Verdict::Drop,
            HookResult::Queue(_) => Verdict::Queue,
            HookResult::Stolen => Verdict::Stolen,
        }
    }
}

/// Stage parameters visible to (and partly rewritable by) hooks
///
/// Forward, post-routing and local-out hooks may change `next_hop`;
/// local-out hooks may also pick `out_interface`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookContext {
    pub in_interface: Option<InterfaceId>,
    pub out_interface: Option<InterfaceId>,
    pub next_hop: Ipv4Addr,
}

impl HookContext {
    pub fn incoming(in_interface: Option<InterfaceId>) -> Self {
        Self {
            in_interface,
            out_interface: None,
            next_hop: Ipv4Addr::UNSPECIFIED,
        }
    }

    pub fn routed(in_interface: Option<InterfaceId>, out_interface: InterfaceId, next_hop: Ipv4Addr) -> Self {
        Self {
            in_interface,
            out_interface: Some(out_interface),
            next_hop,
        }
    }
}

/// A packet-inspection callback
///
/// Every stage defaults to accepting, so a hook only overrides the stages
/// it cares about. Hooks are shared (`Arc`) between the registrant and the
/// engine, so state lives behind interior mutability.
pub trait NetfilterHook: Send + Sync {
    fn name(&self) -> &str {
        "hook"
    }

    fn pre_routing(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        HookResult::Accept(datagram)
    }

    fn local_in(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        HookResult::Accept(datagram)
    }

    fn forward(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        HookResult::Accept(datagram)
    }

    fn post_routing(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        HookResult::Accept(datagram)
    }

    fn local_out(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        HookResult::Accept(datagram)
    }
}

/// Hook registry errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("Hook '{name}' is already registered at priority {priority}")]
    AlreadyRegistered { name: String, priority: i32 },
}
