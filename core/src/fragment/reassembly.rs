//! Fragment reassembly buffer
//!
//! Overlap policy: an exact duplicate fragment is ignored; any other overlap
//! discards the whole entry (RFC 5722). Entries older than the reassembly
//! timeout are removed by `purge_stale`, or by `expire` when another of
//! their fragments shows up first.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::ops::Bound;
use thiserror::Error;
use tracing::{debug, trace};

use super::MAX_DATAGRAM_BYTES;
use crate::datagram::Datagram;

/// Identifies the datagram a fragment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub protocol: u8,
    pub identification: u16,
}

impl ReassemblyKey {
    pub fn of(datagram: &Datagram) -> Self {
        Self {
            src: datagram.src,
            dest: datagram.dest,
            protocol: datagram.protocol,
            identification: datagram.identification,
        }
    }
}

/// Reasons a fragment (and its entry) was thrown away
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Fragment [{start}, {end}) overlaps buffered data")]
    Overlap { start: usize, end: usize },

    #[error("Reassembled datagram would be {0} bytes")]
    TooLarge(usize),

    #[error("Fragment disagrees with the known datagram length {known}")]
    InconsistentLength { known: usize },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReassemblyStats {
    pub fragments_received: u64,
    pub reassembled: u64,
    pub duplicates: u64,
    pub discarded_entries: u64,
    pub timed_out_entries: u64,
}

#[derive(Debug)]
struct ReassemblyEntry {
    first_arrival: u64,
    /// offset → payload bytes
    pieces: BTreeMap<usize, Vec<u8>>,
    /// Header template taken from the offset-0 fragment
    head: Option<Datagram>,
    /// Payload length, known once the last fragment arrived
    total: Option<usize>,
}

impl ReassemblyEntry {
    fn new(now: u64) -> Self {
        Self {
            first_arrival: now,
            pieces: BTreeMap::new(),
            head: None,
            total: None,
        }
    }

    /// Ok(true) for a fresh piece, Ok(false) for an exact duplicate
    fn check_placement(&self, start: usize, bytes: &[u8]) -> Result<bool, FragmentError> {
        let end = start + bytes.len();
        let overlap = FragmentError::Overlap { start, end };

        if let Some((&prev_start, prev)) = self.pieces.range(..=start).next_back() {
            if prev_start == start {
                return if prev.as_slice() == bytes { Ok(false) } else { Err(overlap) };
            }
            if prev_start + prev.len() > start {
                return Err(overlap);
            }
        }
        if let Some((&next_start, _)) = self.pieces.range((Bound::Excluded(start), Bound::Unbounded)).next() {
            if next_start < end {
                return Err(overlap);
            }
        }
        Ok(true)
    }

    fn is_complete(&self) -> bool {
        let (Some(total), Some(_)) = (self.total, self.head.as_ref()) else {
            return false;
        };
        let mut expected = 0;
        for (&start, bytes) in &self.pieces {
            if start != expected {
                return false;
            }
            expected += bytes.len();
        }
        expected == total
    }

    fn assemble(self) -> Option<Datagram> {
        let mut datagram = self.head?;
        let mut payload = Vec::with_capacity(self.total.unwrap_or_default());
        for bytes in self.pieces.into_values() {
            payload.extend_from_slice(&bytes);
        }
        datagram.payload = payload;
        datagram.fragment_offset = 0;
        datagram.more_fragments = false;
        Some(datagram)
    }
}

/// Buffers fragments until their datagram is complete
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    entries: HashMap<ReassemblyKey, ReassemblyEntry>,
    stats: ReassemblyStats,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one fragment; returns the whole datagram when this fragment completes it
    pub fn add_fragment(&mut self, mut fragment: Datagram, now: u64) -> Result<Option<Datagram>, FragmentError> {
        self.stats.fragments_received += 1;
        let key = ReassemblyKey::of(&fragment);
        let start = fragment.fragment_offset;
        let end = start.saturating_add(fragment.payload.len());
        let size = end.saturating_add(fragment.header_length);

        if size > MAX_DATAGRAM_BYTES {
            self.discard(&key);
            return Err(FragmentError::TooLarge(size));
        }

        let entry = self.entries.entry(key).or_insert_with(|| ReassemblyEntry::new(now));

        if let Err(err) = Self::check_length(entry, end, fragment.more_fragments) {
            self.discard(&key);
            return Err(err);
        }

        let bytes = std::mem::take(&mut fragment.payload);
        match entry.check_placement(start, &bytes) {
            Ok(true) => {}
            Ok(false) => {
                trace!("Duplicate fragment at offset {} ignored", start);
                self.stats.duplicates += 1;
                return Ok(None);
            }
            Err(err) => {
                self.discard(&key);
                return Err(err);
            }
        }

        if !fragment.more_fragments {
            entry.total = Some(end);
        }
        entry.pieces.insert(start, bytes);
        if start == 0 {
            entry.head = Some(fragment);
        }

        if !entry.is_complete() {
            return Ok(None);
        }

        let assembled = self.entries.remove(&key).and_then(ReassemblyEntry::assemble);
        if assembled.is_some() {
            self.stats.reassembled += 1;
            debug!("Reassembled datagram id={} from {}", key.identification, key.src);
        }
        Ok(assembled)
    }

    fn check_length(entry: &ReassemblyEntry, end: usize, more_fragments: bool) -> Result<(), FragmentError> {
        let furthest = entry.pieces.iter().next_back().map_or(0, |(s, b)| s + b.len());
        match entry.total {
            Some(known) if end > known || (!more_fragments && end != known) => {
                Err(FragmentError::InconsistentLength { known })
            }
            None if !more_fragments && furthest > end => Err(FragmentError::InconsistentLength { known: end }),
            _ => Ok(()),
        }
    }

    fn discard(&mut self, key: &ReassemblyKey) {
        if self.entries.remove(key).is_some() {
            self.stats.discarded_entries += 1;
        }
    }

    /// Drop the entry `fragment` would join if its first fragment arrived
    /// before `threshold`, so late fragments start a fresh entry
    pub fn expire(&mut self, fragment: &Datagram, threshold: u64) -> bool {
        let key = ReassemblyKey::of(fragment);
        if !self.entries.get(&key).is_some_and(|entry| entry.first_arrival < threshold) {
            return false;
        }
        self.entries.remove(&key);
        self.stats.timed_out_entries += 1;
        debug!("Reassembly entry id={} from {} timed out", key.identification, key.src);
        true
    }

    /// Drop every entry whose first fragment arrived before `threshold`
    pub fn purge_stale(&mut self, threshold: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.first_arrival >= threshold);
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!("Purged {} stale reassembly entries", purged);
            self.stats.timed_out_entries += purged as u64;
        }
        purged
    }

    /// Entries still waiting for fragments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }
}
