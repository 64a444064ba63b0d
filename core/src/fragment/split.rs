//! Splitting a datagram into MTU-sized fragments

use crate::datagram::Datagram;

/// Payload bytes per fragment: what fits after the header, rounded down to 8
pub fn fragment_payload_length(mtu: usize, header_length: usize) -> usize {
    (mtu.saturating_sub(header_length) / 8) * 8
}

/// Cut `datagram` into fragments no larger than `mtu`
///
/// Offsets are relative to the datagram's own offset, so fragmenting a
/// fragment yields correctly placed pieces. Every piece except the last has
/// more-fragments set; the last keeps the original flag. The structured
/// inner unit rides in the first piece only.
///
/// Gives the datagram back if the MTU cannot carry even 8 payload bytes.
pub fn split(mut datagram: Datagram, mtu: usize) -> Result<Vec<Datagram>, Datagram> {
    let chunk = fragment_payload_length(mtu, datagram.header_length);
    if chunk == 0 {
        return Err(datagram);
    }

    let payload = std::mem::take(&mut datagram.payload);
    let mut inner = datagram.inner.take();
    let offset_base = datagram.fragment_offset;
    let original_more = datagram.more_fragments;

    let mut fragments = Vec::with_capacity(payload.len().div_ceil(chunk));
    for (index, piece) in payload.chunks(chunk).enumerate() {
        let offset = index * chunk;
        let last = offset + piece.len() >= payload.len();

        let mut fragment = datagram.duplicate();
        fragment.payload = piece.to_vec();
        fragment.fragment_offset = offset_base + offset;
        fragment.more_fragments = if last { original_more } else { true };
        if index == 0 {
            fragment.inner = inner.take();
        }
        fragments.push(fragment);
    }
    Ok(fragments)
}
