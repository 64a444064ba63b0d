//! Reference error reporter: records reports and builds ICMP notifications

use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::debug;

use super::{ErrorReporter, IcmpError, IcmpMessage};
use crate::datagram::{protocol, Datagram, DatagramId, Encapsulated, SendControl, UpperLayerPacket};

/// ICMP header: type, code, checksum, 4 unused bytes
const ICMP_HEADER_BYTES: usize = 8;

/// Payload bytes of the offending datagram quoted in a notification
const QUOTED_PAYLOAD_BYTES: usize = 8;

/// One call to [`ErrorReporter::report`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub error: IcmpError,
    pub datagram: DatagramId,
    pub src: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub protocol: u8,
    /// Whether a notification was generated for the source
    pub notified: bool,
}

/// Records reports and queues notifications addressed to the original source
#[derive(Debug, Default)]
pub struct IcmpReporter {
    reports: Vec<ErrorReport>,
    notifications: Vec<UpperLayerPacket>,
}

impl IcmpReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report received so far
    pub fn reports(&self) -> &[ErrorReport] {
        &self.reports
    }

    /// Count of reports of one error class
    pub fn count(&self, error: IcmpError) -> usize {
        self.reports.iter().filter(|r| r.error == error).count()
    }

    /// Drain the notifications waiting to be sent back through the engine
    pub fn take_notifications(&mut self) -> Vec<UpperLayerPacket> {
        std::mem::take(&mut self.notifications)
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }

    /// RFC 1122 rules: never notify about errors, non-initial fragments,
    /// or datagrams without a unicast source
    fn should_notify(datagram: &Datagram) -> bool {
        if datagram.fragment_offset != 0 {
            return false;
        }
        if datagram.src.is_unspecified() || datagram.src.is_multicast() || datagram.src.is_broadcast() {
            return false;
        }
        if datagram.protocol == protocol::ICMP {
            if let Some(Encapsulated::Icmp(msg)) = datagram.inner.as_deref() {
                return !msg.icmp_type.is_error();
            }
        }
        true
    }

    fn build_notification(datagram: Datagram, error: IcmpError) -> UpperLayerPacket {
        let mut bytes = Vec::with_capacity(ICMP_HEADER_BYTES + datagram.header_length + QUOTED_PAYLOAD_BYTES);
        bytes.push(error.icmp_type().as_u8());
        bytes.push(error.code());
        bytes.extend_from_slice(&[0u8; 6]);
        bytes.extend_from_slice(&encode_header(&datagram));
        let quoted = datagram.payload.len().min(QUOTED_PAYLOAD_BYTES);
        bytes.extend_from_slice(&datagram.payload[..quoted]);

        let control = SendControl::new(protocol::ICMP, datagram.src);
        let mut packet = UpperLayerPacket::new(control, bytes);
        packet.inner = Some(Encapsulated::Icmp(IcmpMessage::error(error, datagram)));
        packet
    }
}

impl ErrorReporter for IcmpReporter {
    fn report(&mut self, datagram: Datagram, error: IcmpError) {
        let notified = Self::should_notify(&datagram);
        debug!("ICMP {} for {} (notify source: {})", error, datagram, notified);

        self.reports.push(ErrorReport {
            error,
            datagram: datagram.id(),
            src: datagram.src,
            dest: datagram.dest,
            protocol: datagram.protocol,
            notified,
        });

        if notified {
            self.notifications.push(Self::build_notification(datagram, error));
        }
    }
}

/// Wire image of the fixed header (options are zero-filled)
fn encode_header(datagram: &Datagram) -> Vec<u8> {
    let mut header = vec![0u8; datagram.header_length.max(20)];
    let ihl = (header.len() / 4).min(15) as u8;
    header[0] = 0x40 | ihl;
    header[1] = datagram.tos;
    let total = (datagram.byte_length().min(u16::MAX as usize)) as u16;
    header[2..4].copy_from_slice(&total.to_be_bytes());
    header[4..6].copy_from_slice(&datagram.identification.to_be_bytes());
    let mut flags_offset = ((datagram.fragment_offset / 8) as u16) & 0x1FFF;
    if datagram.dont_fragment {
        flags_offset |= 0x4000;
    }
    if datagram.more_fragments {
        flags_offset |= 0x2000;
    }
    header[6..8].copy_from_slice(&flags_offset.to_be_bytes());
    header[8] = datagram.ttl;
    header[9] = datagram.protocol;
    header[12..16].copy_from_slice(&datagram.src.octets());
    header[16..20].copy_from_slice(&datagram.dest.octets());
    header
}
