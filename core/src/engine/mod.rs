//! Forwarding Orchestrator: the network-layer state machine
//!
//! Wires arrival, the hook chain, the routing decision engine and
//! fragmentation/transmission together:
//!
//! ```text
//! interface ──► [PREROUTING] ──► local? ──► reassembly ──► [LOCALIN] ──► deliver
//!                                  │
//!                                  └──► route ──► [FORWARD] ──┐
//! upper layer ──► [LOCALOUT] ──► route ───────────────────────┴──► [POSTROUTING] ──► fragment ──► transmit
//! ```
//!
//! The engine is sans-IO. Transmissions and deliveries are queued as
//! [`EngineOutput`] values and drained by the caller; time is supplied by
//! the caller in milliseconds. Loopback transmissions re-enter the arrival
//! path immediately.

pub mod config;
mod input;
mod output;
pub mod stats;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use crate::datagram::{Datagram, DatagramId, Encapsulated, ReceiveControl};
use crate::fragment::FragmentBuffer;
use crate::hooks::{
    HookChain, HookContext, HookError, HookResult, HookStage, NetfilterHook, PendingTable, SuspendedDatagram, Verdict,
};
use crate::icmp::{ErrorReporter, IcmpError};
use crate::tables::{InterfaceId, InterfaceTable, RoutingTable};

pub use config::{ConfigError, EngineConfig};
pub use stats::ProtocolStats;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Programmer and configuration faults
///
/// Network conditions (no route, TTL exhausted, ...) are never errors; they
/// are counted in [`ProtocolStats`] and handed to the [`ErrorReporter`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("No queued datagram with id {0}")]
    UnknownDatagram(DatagramId),

    #[error("Re-injection of datagram {0} queued at the FORWARD stage is not supported")]
    ForwardReinjectUnsupported(DatagramId),

    #[error("Wrong source address {0}: no interface with such address")]
    UnknownSourceAddress(Ipv4Addr),

    #[error("Unknown interface {0}")]
    UnknownInterface(InterfaceId),

    #[error("Queued {0} record has no interface to resume on")]
    IncompleteContext(HookStage),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Hook registration failed: {0}")]
    Hook(#[from] HookError),
}

// ============================================================================
// OUTPUTS
// ============================================================================

/// A datagram leaving through a (non-loopback) interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub interface: InterfaceId,
    /// All-ones for broadcasts, unspecified when the destination is on-link
    pub next_hop: Ipv4Addr,
    pub datagram: Datagram,
}

/// A unit handed to an upper-layer consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Consumer the unit is dispatched to
    pub protocol: u8,
    pub control: ReceiveControl,
    pub payload: Vec<u8>,
    pub inner: Option<Encapsulated>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutput {
    Transmit(Transmission),
    Deliver(Delivery),
}

impl EngineOutput {
    pub fn as_transmission(&self) -> Option<&Transmission> {
        match self {
            EngineOutput::Transmit(t) => Some(t),
            EngineOutput::Deliver(_) => None,
        }
    }

    pub fn as_delivery(&self) -> Option<&Delivery> {
        match self {
            EngineOutput::Deliver(d) => Some(d),
            EngineOutput::Transmit(_) => None,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Generic network-layer protocol instance
pub struct NetworkProtocol<I, R, E> {
    config: EngineConfig,
    interfaces: I,
    routes: R,
    reporter: E,
    hooks: HookChain,
    pending: PendingTable,
    fragments: FragmentBuffer,
    protocols: BTreeSet<u8>,
    stats: ProtocolStats,
    outputs: VecDeque<EngineOutput>,
    rng: StdRng,
    next_identification: u16,
    last_purge: u64,
    /// Time of the call currently being processed
    clock: u64,
}

impl<I, R, E> NetworkProtocol<I, R, E>
where
    I: InterfaceTable,
    R: RoutingTable,
    E: ErrorReporter,
{
    pub fn new(config: EngineConfig, interfaces: I, routes: R, reporter: E) -> Result<Self, EngineError> {
        config.validate()?;
        let rng = match config.bit_error_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            protocols: config.protocols.iter().copied().collect(),
            config,
            interfaces,
            routes,
            reporter,
            hooks: HookChain::new(),
            pending: PendingTable::new(),
            fragments: FragmentBuffer::new(),
            stats: ProtocolStats::default(),
            outputs: VecDeque::new(),
            rng,
            next_identification: 0,
            last_purge: 0,
            clock: 0,
        })
    }

    // ---- hooks ------------------------------------------------------------

    pub fn register_hook(&mut self, priority: i32, hook: Arc<dyn NetfilterHook>) -> Result<(), EngineError> {
        Ok(self.hooks.register(priority, hook)?)
    }

    /// Returns false if the (priority, hook) pair was not registered
    pub fn unregister_hook(&mut self, priority: i32, hook: &Arc<dyn NetfilterHook>) -> bool {
        self.hooks.unregister(priority, hook)
    }

    /// Resume (or drop) a datagram a hook queued earlier
    ///
    /// `Drop` destroys the datagram; any other verdict resumes the stage the
    /// datagram was queued at. Datagrams queued at FORWARD cannot be resumed:
    /// they are discarded and an error is returned.
    pub fn reinject(&mut self, id: DatagramId, verdict: Verdict, now: u64) -> Result<(), EngineError> {
        self.clock = now;
        let SuspendedDatagram {
            datagram,
            stage,
            context,
            ..
        } = self.pending.take(id).ok_or(EngineError::UnknownDatagram(id))?;

        if verdict == Verdict::Drop {
            debug!("Re-injected {} dropped", id);
            self.stats.dropped_by_hook += 1;
            return Ok(());
        }

        debug!("Resuming {} at {}", id, stage);
        match stage {
            HookStage::PreRouting => {
                let interface = context
                    .in_interface
                    .or(datagram.arrival)
                    .ok_or(EngineError::IncompleteContext(stage))?;
                self.ensure_interface(interface)?;
                self.prerouting_finish(datagram, interface);
            }
            HookStage::LocalIn => self.deliver_finish(datagram),
            HookStage::Forward => {
                error!("Datagram {} was queued at FORWARD and cannot be re-injected", id);
                return Err(EngineError::ForwardReinjectUnsupported(id));
            }
            HookStage::PostRouting => {
                let interface = context.out_interface.ok_or(EngineError::IncompleteContext(stage))?;
                self.ensure_interface(interface)?;
                self.fragment_and_send(datagram, interface, context.next_hop);
            }
            HookStage::LocalOut => self.local_out_finish(datagram, context),
        }
        Ok(())
    }

    /// Ids of datagrams held by hooks, oldest first
    pub fn pending(&self) -> Vec<DatagramId> {
        self.pending.ids()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ---- upper-layer consumers ---------------------------------------------

    pub fn register_protocol(&mut self, protocol: u8) {
        self.protocols.insert(protocol);
    }

    pub fn unregister_protocol(&mut self, protocol: u8) -> bool {
        self.protocols.remove(&protocol)
    }

    pub fn is_protocol_registered(&self, protocol: u8) -> bool {
        self.protocols.contains(&protocol)
    }

    // ---- outputs and state ---------------------------------------------------

    /// Take everything produced since the last drain, in production order
    pub fn drain_outputs(&mut self) -> Vec<EngineOutput> {
        self.outputs.drain(..).collect()
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fragment_buffer(&self) -> &FragmentBuffer {
        &self.fragments
    }

    pub fn interfaces(&self) -> &I {
        &self.interfaces
    }

    pub fn interfaces_mut(&mut self) -> &mut I {
        &mut self.interfaces
    }

    pub fn routes(&self) -> &R {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut R {
        &mut self.routes
    }

    pub fn reporter(&self) -> &E {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut E {
        &mut self.reporter
    }

    // ---- internals -----------------------------------------------------------

    /// Run `stage` and settle the verdict
    ///
    /// Returns the datagram and the (possibly rewritten) context on Accept.
    /// Queued datagrams go to the pending table with the context the stage
    /// will resume on; dropped ones are counted.
    fn run_hooks(&mut self, stage: HookStage, datagram: Datagram, mut ctx: HookContext) -> Option<(Datagram, HookContext)> {
        if self.hooks.is_empty() {
            return Some((datagram, ctx));
        }
        let given = ctx;
        match self.hooks.invoke(stage, datagram, &mut ctx) {
            HookResult::Accept(datagram) => Some((datagram, ctx)),
            HookResult::Drop => {
                self.stats.dropped_by_hook += 1;
                None
            }
            HookResult::Queue(datagram) => {
                debug!("{} queued at {}", datagram.id(), stage);
                // Only LOCALOUT hooks may pick the interface
                let context = match stage {
                    HookStage::LocalOut => ctx,
                    _ => HookContext {
                        next_hop: ctx.next_hop,
                        ..given
                    },
                };
                self.pending.insert(SuspendedDatagram {
                    datagram,
                    stage,
                    context,
                    queued_at: self.clock,
                });
                None
            }
            HookResult::Stolen => None,
        }
    }

    fn report(&mut self, datagram: Datagram, error: IcmpError) {
        debug!("Reporting {} for {}", error, datagram);
        self.reporter.report(datagram, error);
    }

    fn ensure_interface(&self, id: InterfaceId) -> Result<(), EngineError> {
        match self.interfaces.interface_by_id(id) {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownInterface(id)),
        }
    }
}
