// Integration tests for fragmentation and reassembly
//
// A router fragments onto a small-MTU link, a host on that link reassembles

use netlayer_core::*;
use std::net::Ipv4Addr;

const HOST_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 50);

fn mask24() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

fn router() -> StaticNetworkProtocol {
    let mut lo = InterfaceEntry::loopback(0);
    lo.mtu = 1500;
    let interfaces = StaticInterfaceTable::from_entries(vec![
        lo,
        InterfaceEntry::new(1, "eth0", 1500).with_address(Ipv4Addr::new(10, 0, 0, 1), mask24()),
        InterfaceEntry::new(2, "slip0", 296).with_address(Ipv4Addr::new(10, 0, 2, 1), mask24()),
        InterfaceEntry::new(3, "tiny0", 24).with_address(Ipv4Addr::new(10, 0, 3, 1), mask24()),
    ]);
    StaticNetworkProtocol::with_interfaces(EngineConfig::default(), interfaces, true).unwrap()
}

fn host() -> StaticNetworkProtocol {
    let interfaces = StaticInterfaceTable::from_entries(vec![
        InterfaceEntry::loopback(0),
        InterfaceEntry::new(1, "slip0", 296).with_address(HOST_ADDR, mask24()),
    ]);
    StaticNetworkProtocol::with_interfaces(EngineConfig::default(), interfaces, false).unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

fn big(dest: Ipv4Addr, len: usize) -> Datagram {
    Datagram::new(Ipv4Addr::new(10, 0, 0, 7), dest, protocol::UDP, payload(len))
        .with_ttl(16)
        .with_identification(4242)
}

fn fragments_toward_host(len: usize) -> Vec<Datagram> {
    let mut router = router();
    router.handle_packet_from_network(big(HOST_ADDR, len), InterfaceId(1), 0).unwrap();
    router
        .drain_outputs()
        .into_iter()
        .filter_map(|o| match o {
            EngineOutput::Transmit(t) => Some(t.datagram),
            EngineOutput::Deliver(_) => None,
        })
        .collect()
}

#[test]
fn test_router_fragments_to_mtu() {
    let fragments = fragments_toward_host(1000);

    // 296 - 20 = 276, rounded down to 272 payload bytes per fragment
    assert_eq!(fragments.len(), 4);
    assert!(fragments.iter().all(|f| f.byte_length() <= 296));
    assert!(fragments.iter().all(|f| f.fragment_offset % 8 == 0));
    assert!(fragments.iter().all(|f| f.identification == 4242));
    assert!(fragments.iter().all(|f| f.ttl == 15));
    assert_eq!(
        fragments.iter().map(|f| f.fragment_offset).collect::<Vec<_>>(),
        vec![0, 272, 544, 816]
    );
    assert_eq!(
        fragments.iter().map(|f| f.more_fragments).collect::<Vec<_>>(),
        vec![true, true, true, false]
    );
    assert_eq!(fragments.iter().map(|f| f.payload.len()).sum::<usize>(), 1000);

    println!("✓ Oversized datagram split on 8-byte boundaries");
}

#[test]
fn test_host_reassembles_in_any_order() {
    for reverse in [false, true] {
        let mut fragments = fragments_toward_host(1000);
        if reverse {
            fragments.reverse();
        }

        let mut host = host();
        let count = fragments.len();
        for (i, fragment) in fragments.into_iter().enumerate() {
            host.handle_packet_from_network(fragment, InterfaceId(1), 100).unwrap();
            let outputs = host.drain_outputs();
            if i + 1 < count {
                assert!(outputs.is_empty(), "delivered before the last fragment");
            } else {
                assert_eq!(outputs.len(), 1);
                let delivery = outputs[0].as_delivery().unwrap();
                assert_eq!(delivery.payload, payload(1000));
                assert_eq!(delivery.control.src, Ipv4Addr::new(10, 0, 0, 7));
            }
        }
        assert!(host.fragment_buffer().is_empty());
        assert_eq!(host.fragment_buffer().stats().reassembled, 1);
    }

    println!("✓ Reassembly is order-independent and byte-exact");
}

#[test]
fn test_stale_entry_purged_and_never_completes() {
    let fragments = fragments_toward_host(1000);
    let mut host = host();
    let mut iter = fragments.into_iter();

    let first = iter.next().unwrap();
    host.handle_packet_from_network(first, InterfaceId(1), 0).unwrap();
    assert_eq!(host.fragment_buffer().len(), 1);

    // Past the 60 s timeout: the sweep runs before the late fragments are added
    for late in iter {
        host.handle_packet_from_network(late, InterfaceId(1), 70_000).unwrap();
    }
    assert!(host.drain_outputs().is_empty());
    assert_eq!(host.stats().local_delivered, 0);
    assert_eq!(host.fragment_buffer().stats().timed_out_entries, 1);
    assert_eq!(host.stats().dropped_reassembly, 1);
    // The late fragments wait for an offset-0 fragment that is gone
    assert_eq!(host.fragment_buffer().len(), 1);

    println!("✓ Timed-out reassembly never completes");
}

fn host_with_timeout(fragment_timeout_ms: u64) -> StaticNetworkProtocol {
    let config = EngineConfig {
        fragment_timeout_ms,
        ..EngineConfig::default()
    };
    let interfaces = StaticInterfaceTable::from_entries(vec![InterfaceEntry::new(1, "slip0", 296).with_address(HOST_ADDR, mask24())]);
    StaticNetworkProtocol::with_interfaces(config, interfaces, false).unwrap()
}

#[test]
fn test_sweep_is_rate_limited() {
    let fragments = fragments_toward_host(1000);
    let mut host = host_with_timeout(1_000);
    let other = |fragment: &Datagram| {
        let mut fragment = fragment.clone();
        fragment.identification = 4243;
        fragment
    };

    // A sweep runs at t=10 s, before this fragment is buffered
    host.handle_packet_from_network(fragments[0].clone(), InterfaceId(1), 10_000).unwrap();
    // Unrelated traffic does not touch the stale entry until the next sweep at t=20 s
    host.handle_packet_from_network(other(&fragments[1]), InterfaceId(1), 15_000).unwrap();
    assert_eq!(host.fragment_buffer().stats().timed_out_entries, 0);
    assert_eq!(host.fragment_buffer().len(), 2);

    host.handle_packet_from_network(other(&fragments[2]), InterfaceId(1), 20_000).unwrap();
    assert_eq!(host.fragment_buffer().stats().timed_out_entries, 2);
    assert_eq!(host.fragment_buffer().len(), 1);
    assert_eq!(host.stats().dropped_reassembly, 2);

    // The rest of the first datagram finds nothing to complete
    for late in fragments.into_iter().skip(1) {
        host.handle_packet_from_network(late, InterfaceId(1), 20_000).unwrap();
    }
    assert!(host.drain_outputs().is_empty());
    assert_eq!(host.stats().local_delivered, 0);

    println!("✓ Sweeps respect the purge interval");
}

#[test]
fn test_timed_out_entry_never_completes_between_sweeps() {
    let fragments = fragments_toward_host(1000);
    let mut host = host_with_timeout(1_000);

    host.handle_packet_from_network(fragments[0].clone(), InterfaceId(1), 10_000).unwrap();
    // No sweep is due at t=15 s, yet the entry is 4 s past its timeout
    for late in fragments.into_iter().skip(1) {
        host.handle_packet_from_network(late, InterfaceId(1), 15_000).unwrap();
    }

    assert!(host.drain_outputs().is_empty());
    assert_eq!(host.stats().local_delivered, 0);
    assert_eq!(host.fragment_buffer().stats().timed_out_entries, 1);
    assert_eq!(host.fragment_buffer().stats().reassembled, 0);
    assert_eq!(host.stats().dropped_reassembly, 1);
    // The late fragments started a new entry that lacks offset 0
    assert_eq!(host.fragment_buffer().len(), 1);

    println!("✓ Late fragments inside the sweep interval never revive an expired entry");
}

#[test]
fn test_reassembly_at_end_of_clock() {
    let fragments = fragments_toward_host(1000);
    let mut host = host();

    for fragment in fragments.iter().cloned() {
        host.handle_packet_from_network(fragment, InterfaceId(1), u64::MAX).unwrap();
    }
    assert_eq!(host.stats().local_delivered, 1);

    host.handle_packet_from_network(fragments[1].clone(), InterfaceId(1), u64::MAX).unwrap();
    assert_eq!(host.fragment_buffer().len(), 1);
    assert_eq!(host.stats().dropped_reassembly, 0);

    println!("✓ Clock values near u64::MAX do not overflow the sweep schedule");
}

#[test]
fn test_overlapping_fragment_discards_entry() {
    let fragments = fragments_toward_host(1000);
    let mut host = host();

    host.handle_packet_from_network(fragments[0].clone(), InterfaceId(1), 0).unwrap();
    let mut overlap = fragments[1].clone();
    overlap.fragment_offset -= 8;
    host.handle_packet_from_network(overlap, InterfaceId(1), 0).unwrap();

    assert!(host.fragment_buffer().is_empty());
    assert_eq!(host.stats().dropped_reassembly, 1);

    // An exact duplicate is harmless
    let mut host = host_with_all_but_last(&fragments);
    host.handle_packet_from_network(fragments[1].clone(), InterfaceId(1), 0).unwrap();
    host.handle_packet_from_network(fragments[3].clone(), InterfaceId(1), 0).unwrap();
    assert_eq!(host.drain_outputs().len(), 1);

    println!("✓ Overlap discards, duplicates are ignored");
}

fn host_with_all_but_last(fragments: &[Datagram]) -> StaticNetworkProtocol {
    let mut host = host();
    for fragment in &fragments[..fragments.len() - 1] {
        host.handle_packet_from_network(fragment.clone(), InterfaceId(1), 0).unwrap();
    }
    host
}

#[test]
fn test_dont_fragment_and_tiny_mtu() {
    let mut router = router();

    let d = big(HOST_ADDR, 1000).with_dont_fragment(true);
    router.handle_packet_from_network(d, InterfaceId(1), 0).unwrap();
    assert!(router.drain_outputs().is_empty());

    // 24-byte MTU leaves 4 payload bytes: not even one 8-byte block
    router.handle_packet_from_network(big(Ipv4Addr::new(10, 0, 3, 9), 100), InterfaceId(1), 0).unwrap();
    assert!(router.drain_outputs().is_empty());

    let needed = IcmpError::DestinationUnreachable(UnreachableCode::FragmentationNeeded);
    assert_eq!(router.reporter().count(needed), 2);
    assert_eq!(router.stats().dropped_fragmentation_required, 2);

    println!("✓ Fragmentation-required reported for DF and unusable MTUs");
}

#[test]
fn test_loopback_never_fragments() {
    let mut router = router();
    let control = SendControl::new(protocol::UDP, Ipv4Addr::new(10, 0, 2, 1));
    engine_send(&mut router, control, payload(5000));

    let outputs = router.drain_outputs();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].as_delivery().unwrap().payload, payload(5000));
    assert!(router.fragment_buffer().is_empty());

    println!("✓ Loopback carries oversized datagrams whole");
}

fn engine_send(engine: &mut StaticNetworkProtocol, control: SendControl, bytes: Vec<u8>) {
    engine.send_packet(UpperLayerPacket::new(control, bytes), 0).unwrap();
}

#[test]
fn test_refragmenting_a_fragment_keeps_offsets() {
    let mut router = router();
    // A 1400-byte-payload fragment from further upstream, offset 1480, more to come
    let mut upstream = big(HOST_ADDR, 1400);
    upstream.fragment_offset = 1480;
    upstream.more_fragments = true;
    router.handle_packet_from_network(upstream, InterfaceId(1), 0).unwrap();

    let outputs = router.drain_outputs();
    let pieces: Vec<_> = outputs.iter().filter_map(EngineOutput::as_transmission).collect();
    assert_eq!(pieces[0].datagram.fragment_offset, 1480);
    assert_eq!(pieces[1].datagram.fragment_offset, 1480 + 272);
    assert!(pieces.iter().all(|p| p.datagram.more_fragments));

    println!("✓ Re-fragmentation preserves the offset base and MF flag");
}
