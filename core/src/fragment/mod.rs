//! Fragmentation: splitting oversized datagrams and putting them back together
//!
//! - `split`: cuts a datagram into MTU-bounded fragments on 8-byte boundaries
//! - `reassembly`: buffers fragments per (source, destination, protocol,
//!   identification) and releases the whole datagram once complete

pub mod reassembly;
pub mod split;

pub use reassembly::{FragmentBuffer, FragmentError, ReassemblyKey, ReassemblyStats};
pub use split::{fragment_payload_length, split};

/// Largest datagram a 16-bit total-length field can describe
pub const MAX_DATAGRAM_BYTES: usize = 65_535;

/// Minimum interval between stale-entry sweeps (milliseconds)
pub const PURGE_INTERVAL_MS: u64 = 10_000;
