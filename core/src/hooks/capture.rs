//! Passive tap hook: records what passes each stage

use parking_lot::Mutex;
use serde::Serialize;
use std::net::Ipv4Addr;

use super::{HookContext, HookResult, HookStage, NetfilterHook};
use crate::datagram::{Datagram, DatagramId};
use crate::tables::InterfaceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureRecord {
    pub stage: HookStage,
    pub datagram: DatagramId,
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub ttl: u8,
    pub length: usize,
    pub in_interface: Option<InterfaceId>,
    pub out_interface: Option<InterfaceId>,
}

/// Accepts everything and keeps a trace of every stage it saw
#[derive(Debug, Default)]
pub struct CaptureHook {
    records: Mutex<Vec<CaptureRecord>>,
}

impl CaptureHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CaptureRecord> {
        self.records.lock().clone()
    }

    pub fn count(&self, stage: HookStage) -> usize {
        self.records.lock().iter().filter(|r| r.stage == stage).count()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    fn record(&self, stage: HookStage, datagram: Datagram, ctx: &HookContext) -> HookResult {
        self.records.lock().push(CaptureRecord {
            stage,
            datagram: datagram.id(),
            src: datagram.src,
            dest: datagram.dest,
            ttl: datagram.ttl,
            length: datagram.byte_length(),
            in_interface: ctx.in_interface,
            out_interface: ctx.out_interface,
        });
        HookResult::Accept(datagram)
    }
}

impl NetfilterHook for CaptureHook {
    fn name(&self) -> &str {
        "capture"
    }

    fn pre_routing(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        self.record(HookStage::PreRouting, datagram, ctx)
    }

    fn local_in(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        self.record(HookStage::LocalIn, datagram, ctx)
    }

    fn forward(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        self.record(HookStage::Forward, datagram, ctx)
    }

    fn post_routing(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        self.record(HookStage::PostRouting, datagram, ctx)
    }

    fn local_out(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        self.record(HookStage::LocalOut, datagram, ctx)
    }
}
