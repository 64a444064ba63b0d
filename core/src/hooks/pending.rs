//! Datagrams parked by a `Queue` verdict

use std::collections::HashMap;

use super::{HookContext, HookStage};
use crate::datagram::{Datagram, DatagramId};

/// A held datagram plus everything needed to resume its stage
#[derive(Debug)]
pub struct SuspendedDatagram {
    pub datagram: Datagram,
    pub stage: HookStage,
    pub context: HookContext,
    /// Time the datagram was queued
    pub queued_at: u64,
}

/// Queued datagrams keyed by identity
///
/// Nothing expires here: a queued datagram waits until its holder
/// re-injects it.
#[derive(Debug, Default)]
pub struct PendingTable {
    records: HashMap<DatagramId, SuspendedDatagram>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: SuspendedDatagram) {
        self.records.insert(record.datagram.id(), record);
    }

    /// Remove and return the record for `id`
    pub fn take(&mut self, id: DatagramId) -> Option<SuspendedDatagram> {
        self.records.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Held ids, oldest first
    pub fn ids(&self) -> Vec<DatagramId> {
        let mut ids: Vec<_> = self.records.values().map(|r| (r.queued_at, r.datagram.id())).collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }
}
