// Integration tests for the netfilter hook chain
//
// Drop/Queue/Stolen verdicts at every stage, re-injection, context
// rewrites, and registration semantics

use netlayer_core::*;
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;

fn mask24() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

fn router() -> StaticNetworkProtocol {
    let interfaces = StaticInterfaceTable::from_entries(vec![
        InterfaceEntry::loopback(0),
        InterfaceEntry::new(1, "eth0", 1500).with_address(Ipv4Addr::new(10, 0, 0, 1), mask24()),
        InterfaceEntry::new(2, "eth1", 1500).with_address(Ipv4Addr::new(10, 0, 1, 1), mask24()),
    ]);
    StaticNetworkProtocol::with_interfaces(EngineConfig::default(), interfaces, true).unwrap()
}

fn transit(ttl: u8) -> Datagram {
    Datagram::new(Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(10, 0, 1, 20), protocol::UDP, vec![5; 200]).with_ttl(ttl)
}

fn to_local(ttl: u8) -> Datagram {
    Datagram::new(Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(10, 0, 1, 1), protocol::UDP, vec![5; 20]).with_ttl(ttl)
}

fn transmissions(outputs: &[EngineOutput]) -> Vec<&Transmission> {
    outputs.iter().filter_map(EngineOutput::as_transmission).collect()
}

fn deliveries(outputs: &[EngineOutput]) -> Vec<&Delivery> {
    outputs.iter().filter_map(EngineOutput::as_delivery).collect()
}

/// Applies one verdict at one stage and remembers what it held or stole
struct StageHook {
    stage: HookStage,
    verdict: Verdict,
    held: Mutex<Vec<DatagramId>>,
    stolen: Mutex<Vec<Datagram>>,
}

impl StageHook {
    fn new(stage: HookStage, verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            stage,
            verdict,
            held: Mutex::new(Vec::new()),
            stolen: Mutex::new(Vec::new()),
        })
    }

    fn held(&self) -> Vec<DatagramId> {
        self.held.lock().clone()
    }

    fn apply(&self, stage: HookStage, datagram: Datagram) -> HookResult {
        if stage != self.stage {
            return HookResult::Accept(datagram);
        }
        match self.verdict {
            Verdict::Accept => HookResult::Accept(datagram),
            Verdict::Drop => HookResult::Drop,
            Verdict::Queue => {
                self.held.lock().push(datagram.id());
                HookResult::Queue(datagram)
            }
            Verdict::Stolen => {
                self.stolen.lock().push(datagram);
                HookResult::Stolen
            }
        }
    }
}

impl NetfilterHook for StageHook {
    fn name(&self) -> &str {
        "stage"
    }

    fn pre_routing(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        self.apply(HookStage::PreRouting, datagram)
    }

    fn local_in(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        self.apply(HookStage::LocalIn, datagram)
    }

    fn forward(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        self.apply(HookStage::Forward, datagram)
    }

    fn post_routing(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        self.apply(HookStage::PostRouting, datagram)
    }

    fn local_out(&self, datagram: Datagram, _ctx: &mut HookContext) -> HookResult {
        self.apply(HookStage::LocalOut, datagram)
    }
}

/// Position-based forwarding in miniature: picks interface and next hop for
/// originated traffic, and redirects forwarded traffic to a fixed gateway
struct Steering {
    out: InterfaceId,
    next_hop: Ipv4Addr,
}

impl NetfilterHook for Steering {
    fn local_out(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        ctx.out_interface = Some(self.out);
        ctx.next_hop = self.next_hop;
        HookResult::Accept(datagram)
    }

    fn forward(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        ctx.next_hop = self.next_hop;
        HookResult::Accept(datagram)
    }
}

/// Points packets at the wrong interfaces and a new gateway, then applies
/// its verdict
struct Rewire {
    verdict: Verdict,
    held: Mutex<Vec<DatagramId>>,
}

impl Rewire {
    fn new(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            held: Mutex::new(Vec::new()),
        })
    }

    fn settle(&self, datagram: Datagram) -> HookResult {
        if self.verdict == Verdict::Queue {
            self.held.lock().push(datagram.id());
            return HookResult::Queue(datagram);
        }
        HookResult::Accept(datagram)
    }
}

impl NetfilterHook for Rewire {
    fn pre_routing(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        ctx.in_interface = Some(InterfaceId(2));
        self.settle(datagram)
    }

    fn post_routing(&self, datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        ctx.out_interface = Some(InterfaceId(1));
        ctx.next_hop = Ipv4Addr::new(10, 0, 1, 99);
        self.settle(datagram)
    }
}

#[test]
fn test_prerouting_drop_blocks_everything() {
    let mut engine = router();
    let capture = Arc::new(CaptureHook::new());
    engine.register_hook(0, StageHook::new(HookStage::PreRouting, Verdict::Drop)).unwrap();
    engine.register_hook(10, capture.clone()).unwrap();

    for i in 0..100 {
        let d = if i % 2 == 0 { transit(8) } else { to_local(8) };
        engine.handle_packet_from_network(d, InterfaceId(1), i).unwrap();
    }

    let outputs = engine.drain_outputs();
    assert!(deliveries(&outputs).is_empty());
    assert!(transmissions(&outputs).is_empty());
    assert_eq!(engine.stats().local_delivered, 0);
    assert_eq!(engine.stats().forwarded, 0);
    assert_eq!(engine.stats().dropped_by_hook, 100);
    // The later hook never saw anything
    assert!(capture.records().is_empty());

    println!("✓ 100 datagrams dropped at PREROUTING, none observed later");
}

#[test]
fn test_postrouting_queue_then_accept_matches_direct_path() {
    // Reference run without hooks
    let mut direct = router();
    direct.handle_packet_from_network(transit(5), InterfaceId(1), 0).unwrap();
    let expected = direct.drain_outputs();
    let expected = transmissions(&expected)[0].clone();

    let mut engine = router();
    let hook = StageHook::new(HookStage::PostRouting, Verdict::Queue);
    engine.register_hook(0, hook.clone()).unwrap();

    engine.handle_packet_from_network(transit(5), InterfaceId(1), 0).unwrap();
    assert!(engine.drain_outputs().is_empty());
    assert_eq!(engine.pending_count(), 1);

    let id = hook.held()[0];
    assert_eq!(engine.pending(), vec![id]);
    engine.reinject(id, Verdict::Accept, 5).unwrap();

    let outputs = engine.drain_outputs();
    let sent = transmissions(&outputs);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].datagram.ttl, 4);
    assert_eq!(sent[0].interface, expected.interface);
    assert_eq!(sent[0].next_hop, expected.next_hop);
    assert_eq!(sent[0].datagram.payload, expected.datagram.payload);
    assert_eq!(sent[0].datagram.src, expected.datagram.src);
    assert_eq!(engine.pending_count(), 0);

    // The handle is spent
    assert_eq!(engine.reinject(id, Verdict::Accept, 6), Err(EngineError::UnknownDatagram(id)));

    println!("✓ Queued at POSTROUTING, re-injected, transmitted once with TTL 4");
}

#[test]
fn test_reinject_drop_destroys() {
    let mut engine = router();
    let hook = StageHook::new(HookStage::PostRouting, Verdict::Queue);
    engine.register_hook(0, hook.clone()).unwrap();

    engine.handle_packet_from_network(transit(5), InterfaceId(1), 0).unwrap();
    engine.reinject(hook.held()[0], Verdict::Drop, 1).unwrap();

    assert!(engine.drain_outputs().is_empty());
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(engine.stats().dropped_by_hook, 1);

    println!("✓ Re-injection with Drop destroys the datagram");
}

#[test]
fn test_forward_stage_reinject_is_rejected() {
    let mut engine = router();
    let hook = StageHook::new(HookStage::Forward, Verdict::Queue);
    engine.register_hook(0, hook.clone()).unwrap();

    engine.handle_packet_from_network(transit(5), InterfaceId(1), 0).unwrap();
    let id = hook.held()[0];
    assert_eq!(
        engine.reinject(id, Verdict::Accept, 1),
        Err(EngineError::ForwardReinjectUnsupported(id))
    );
    // The record is gone and nothing was sent
    assert_eq!(engine.pending_count(), 0);
    assert!(engine.drain_outputs().is_empty());

    println!("✓ FORWARD re-injection fails loudly");
}

#[test]
fn test_prerouting_queue_resumes_routing() {
    let mut engine = router();
    let hook = StageHook::new(HookStage::PreRouting, Verdict::Queue);
    engine.register_hook(0, hook.clone()).unwrap();

    engine.handle_packet_from_network(transit(5), InterfaceId(1), 0).unwrap();
    assert!(engine.drain_outputs().is_empty());

    // Unregister first: the resumed datagram must not be queued again
    let as_dyn: Arc<dyn NetfilterHook> = hook.clone();
    assert!(!engine.unregister_hook(1, &as_dyn));
    assert!(engine.unregister_hook(0, &as_dyn));

    engine.reinject(hook.held()[0], Verdict::Accept, 1).unwrap();
    let outputs = engine.drain_outputs();
    let sent = transmissions(&outputs);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].interface, InterfaceId(2));

    println!("✓ PREROUTING re-injection resumes routing");
}

#[test]
fn test_localin_queue_resumes_delivery() {
    let mut engine = router();
    let hook = StageHook::new(HookStage::LocalIn, Verdict::Queue);
    engine.register_hook(0, hook.clone()).unwrap();

    engine.handle_packet_from_network(to_local(3), InterfaceId(1), 0).unwrap();
    assert!(engine.drain_outputs().is_empty());

    engine.reinject(hook.held()[0], Verdict::Accept, 1).unwrap();
    let outputs = engine.drain_outputs();
    let delivered = deliveries(&outputs);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].control.ttl, 3);

    println!("✓ LOCALIN re-injection resumes delivery");
}

#[test]
fn test_localout_queue_resumes_routing() {
    let mut engine = router();
    let hook = StageHook::new(HookStage::LocalOut, Verdict::Queue);
    engine.register_hook(0, hook.clone()).unwrap();

    let mut control = SendControl::new(protocol::UDP, Ipv4Addr::new(10, 0, 1, 20));
    control.ttl = 6;
    engine.send_packet(UpperLayerPacket::new(control, vec![1; 8]), 0).unwrap();
    assert!(engine.drain_outputs().is_empty());

    engine.reinject(hook.held()[0], Verdict::Accept, 1).unwrap();
    let outputs = engine.drain_outputs();
    let sent = transmissions(&outputs);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].datagram.ttl, 5);
    assert_eq!(sent[0].datagram.src, Ipv4Addr::new(10, 0, 1, 1));

    println!("✓ LOCALOUT re-injection resumes routing");
}

#[test]
fn test_stolen_datagram_is_forgotten() {
    let mut engine = router();
    let hook = StageHook::new(HookStage::Forward, Verdict::Stolen);
    engine.register_hook(0, hook.clone()).unwrap();

    let d = transit(5);
    let id = d.id();
    engine.handle_packet_from_network(d, InterfaceId(1), 0).unwrap();

    assert!(engine.drain_outputs().is_empty());
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(engine.stats().forwarded, 0);
    assert_eq!(engine.stats().dropped_by_hook, 0);
    let stolen = hook.stolen.lock();
    assert_eq!(stolen.len(), 1);
    assert_eq!(stolen[0].id(), id);

    println!("✓ Stolen datagrams belong to the hook");
}

#[test]
fn test_hooks_steer_interface_and_next_hop() {
    let mut engine = router();
    let gateway = Ipv4Addr::new(10, 0, 1, 250);
    engine
        .register_hook(0, Arc::new(Steering { out: InterfaceId(2), next_hop: gateway }))
        .unwrap();

    // Originated traffic for a destination with no route at all
    let control = SendControl::new(protocol::UDP, Ipv4Addr::new(99, 0, 0, 1));
    engine.send_packet(UpperLayerPacket::new(control, vec![0; 4]), 0).unwrap();
    // Forwarded traffic gets a new next hop
    engine.handle_packet_from_network(transit(5), InterfaceId(1), 0).unwrap();

    let outputs = engine.drain_outputs();
    let sent = transmissions(&outputs);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|t| t.interface == InterfaceId(2) && t.next_hop == gateway));
    assert_eq!(engine.stats().dropped_unroutable, 0);

    println!("✓ LOCALOUT and FORWARD hooks rewrite interface and next hop");
}

#[test]
fn test_capture_sees_every_stage_in_order() {
    let mut engine = router();
    let capture = Arc::new(CaptureHook::new());
    engine.register_hook(0, capture.clone()).unwrap();

    engine.handle_packet_from_network(transit(5), InterfaceId(1), 0).unwrap();
    let stages: Vec<_> = capture.records().iter().map(|r| r.stage).collect();
    assert_eq!(stages, vec![HookStage::PreRouting, HookStage::Forward, HookStage::PostRouting]);

    capture.clear();
    let control = SendControl::new(protocol::UDP, Ipv4Addr::new(10, 0, 0, 1));
    engine.send_packet(UpperLayerPacket::new(control, vec![]), 0).unwrap();
    let stages: Vec<_> = capture.records().iter().map(|r| r.stage).collect();
    // Local destination: out through loopback and back in
    assert_eq!(
        stages,
        vec![HookStage::LocalOut, HookStage::PostRouting, HookStage::PreRouting, HookStage::LocalIn]
    );

    println!("✓ Capture hook observes the stage sequence");
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut engine = router();
    let capture: Arc<dyn NetfilterHook> = Arc::new(CaptureHook::new());
    engine.register_hook(5, capture.clone()).unwrap();
    assert!(matches!(
        engine.register_hook(5, capture.clone()),
        Err(EngineError::Hook(HookError::AlreadyRegistered { priority: 5, .. }))
    ));
    assert!(engine.unregister_hook(5, &capture));
    assert!(!engine.unregister_hook(5, &capture));

    println!("✓ Registration is checked, unregistration idempotent");
}

#[test]
fn test_queued_context_matches_accept_path() {
    let run = |verdict: Verdict, datagram: Datagram, stage_count: usize| {
        let mut engine = router();
        let hook = Rewire::new(verdict);
        engine.register_hook(0, hook.clone()).unwrap();
        engine.handle_packet_from_network(datagram, InterfaceId(1), 0).unwrap();
        // Each queued stage is resumed in turn
        for _ in 0..stage_count {
            let held: Vec<_> = hook.held.lock().drain(..).collect();
            for id in held {
                engine.reinject(id, Verdict::Accept, 1).unwrap();
            }
        }
        assert_eq!(engine.pending_count(), 0);
        engine.drain_outputs()
    };

    // PREROUTING then POSTROUTING for a transit datagram
    let accepted = run(Verdict::Accept, transit(5), 0);
    let resumed = run(Verdict::Queue, transit(5), 2);
    let (accepted, resumed) = (transmissions(&accepted), transmissions(&resumed));
    assert_eq!(accepted.len(), 1);
    assert_eq!(resumed.len(), 1);
    assert_eq!(accepted[0].interface, InterfaceId(2));
    assert_eq!(resumed[0].interface, accepted[0].interface);
    // Next hop rewrites survive either way
    assert_eq!(accepted[0].next_hop, Ipv4Addr::new(10, 0, 1, 99));
    assert_eq!(resumed[0].next_hop, accepted[0].next_hop);

    let accepted = run(Verdict::Accept, to_local(5), 0);
    let resumed = run(Verdict::Queue, to_local(5), 1);
    let (accepted, resumed) = (deliveries(&accepted), deliveries(&resumed));
    assert_eq!(accepted.len(), 1);
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].control.interface, accepted[0].control.interface);

    println!("✓ Queue then reinject leaves on the same interface as Accept");
}
