// End-to-end engine scenarios from spec.md section 8.

mod common;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use mdnsd::wire::{Class, Message, Name, Question, Record, Resource, Type};
use mdnsd::{EngineError, QueryControl};

fn a(name: &str, ip: [u8; 4]) -> Record {
    Record {
        name: Name::parse(name).unwrap(),
        class: Class::Internet,
        cache_flush: true,
        ttl: Duration::from_secs(120),
        resource: Resource::A(Ipv4Addr::from(ip)),
    }
}

fn ptr(owner: &str, target: &str) -> Record {
    Record {
        name: Name::parse(owner).unwrap(),
        class: Class::Internet,
        cache_flush: false,
        ttl: Duration::from_secs(4500),
        resource: Resource::PTR(Name::parse(target).unwrap()),
    }
}

fn drain_outbound(engine: &mut mdnsd::Engine) -> Vec<mdnsd::Outbound> {
    let mut out = Vec::new();
    while let Some(o) = engine.next_outbound() {
        out.push(o);
    }
    out
}

/// Scenario 1: publish `myhost.local` A 10.0.0.42. Three probes spaced
/// >= 250ms apart, then two unsolicited announces, then an inbound
/// query gets an answer carrying the published TTL.
#[test]
fn scenario_1_publish_probes_announces_then_answers_queries() {
    let (mut engine, clock) = common::test_engine();
    let record = a("myhost.local", [10, 0, 0, 42]);
    let _token = engine.publish(record.clone(), |_, _| {}).unwrap();

    let mut prev = clock.now();
    let mut send_times = Vec::new();
    for _ in 0..5 {
        let this_round = prev;
        let next = engine.step(prev);
        let sent = !drain_outbound(&mut engine).is_empty();
        if sent {
            send_times.push(this_round);
        }
        clock.advance(next.saturating_duration_since(prev));
        prev = next;
    }

    assert_eq!(send_times.len(), 5, "expected 3 probes + 2 announces");
    assert!(send_times[1].duration_since(send_times[0]) >= Duration::from_millis(250));
    assert!(send_times[2].duration_since(send_times[1]) >= Duration::from_millis(250));

    // An inbound multicast query (QU clear, source port 5353) gets
    // aggregated; advance past the jitter window to see the response.
    let mut query = Message::query(0);
    query.questions.push(Question::new(record.name.clone(), Type::A));
    let (bytes, _) = query.serialize();
    engine.receive(&bytes, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), mdnsd::wire::MDNS_PORT));

    // First step only learns the aggregation deadline; a second one
    // at that deadline actually flushes the aggregated response.
    let next = engine.step(prev);
    clock.advance(next.saturating_duration_since(prev));
    prev = next;
    let next = engine.step(prev);
    clock.advance(next.saturating_duration_since(prev));
    let responses = drain_outbound(&mut engine);
    assert_eq!(responses.len(), 1);
    let parsed = Message::parse(&responses[0].bytes).unwrap();
    assert_eq!(parsed.answers.len(), 1);
    assert_eq!(parsed.answers[0].ttl, Duration::from_secs(120));
    assert_eq!(parsed.answers[0].resource, record.resource);
}

/// Scenario 2: a conflicting response during probing fires the
/// conflict callback and the record never reaches Steady.
#[test]
fn scenario_2_conflicting_response_during_probe_fires_callback() {
    let (mut engine, clock) = common::test_engine();
    let record = a("myhost.local", [10, 0, 0, 42]);

    let fired = std::rc::Rc::new(std::cell::RefCell::new(None));
    let fired_clone = fired.clone();
    engine
        .publish(record.clone(), move |name, t| {
            *fired_clone.borrow_mut() = Some((name.clone(), t));
        })
        .unwrap();

    // Still probing (no steps taken yet beyond the publish call itself).
    let mut conflicting = Message::response(0);
    conflicting.answers.push(a("myhost.local", [10, 0, 0, 99]));
    let (bytes, _) = conflicting.serialize();
    engine.receive(&bytes, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 99), mdnsd::wire::MDNS_PORT));

    assert_eq!(fired.borrow().as_ref().map(|(n, t)| (n.to_string(), *t)), Some(("myhost.local.".to_string(), Type::A)));

    // No announcement should ever occur for the withdrawn record: draining
    // outbound at and after the original probe schedule yields nothing
    // once the publisher has forgotten the token.
    let now = clock.now();
    let _ = engine.step(now);
    for out in drain_outbound(&mut engine) {
        let parsed = Message::parse(&out.bytes).unwrap();
        assert!(parsed.answers.is_empty() && parsed.authorities.is_empty());
    }
}

/// Scenario 5: a response too big for one packet splits across
/// multiple `next_outbound()` calls, each under `MAX_PACKET_LEN`.
#[test]
fn scenario_5_oversized_response_splits_across_multiple_packets() {
    let (mut engine, clock) = common::test_engine();

    let owner = "_http._tcp.local";
    for i in 0..200u32 {
        let record = ptr(owner, &format!("host{}._http._tcp.local", i));
        engine.publish(record, |_, _| {}).unwrap();
    }

    // Shared records skip probing: two steps (Announce1, Announce2)
    // bring every one of them to Steady.
    let mut now = clock.now();
    now = engine.step(now);
    let _ = engine.step(now);
    drain_outbound(&mut engine);

    // A legacy (non-5353-source-port) query gets an immediate reply,
    // which is where the 200-answer response gets built and split.
    let mut query = Message::query(0);
    query.questions.push(Question::new(Name::parse(owner).unwrap(), Type::PTR));
    let (bytes, _) = query.serialize();
    engine.receive(&bytes, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 54321));

    let packets = drain_outbound(&mut engine);
    assert!(packets.len() > 1, "200 PTR answers must not fit in one packet");

    let mut total_answers = 0;
    for out in &packets {
        assert!(out.bytes.len() <= mdnsd::wire::MAX_PACKET_LEN);
        let parsed = Message::parse(&out.bytes).unwrap();
        total_answers += parsed.answers.len();
    }
    assert_eq!(total_answers, 200);
}

/// Scenario 6: shutdown emits exactly one goodbye per published record,
/// then nothing more.
#[test]
fn scenario_6_shutdown_emits_one_goodbye_per_record_then_stops() {
    let (mut engine, clock) = common::test_engine();
    for host in ["a.local", "b.local"] {
        engine.publish(a(host, [10, 0, 0, 1]), |_, _| {}).unwrap();
    }

    let mut now = clock.now();
    for _ in 0..5 {
        now = engine.step(now);
    }
    drain_outbound(&mut engine);

    engine.shutdown();
    now = engine.step(now);
    let _ = engine.step(now);

    let mut goodbyes = 0;
    for out in drain_outbound(&mut engine) {
        let parsed = Message::parse(&out.bytes).unwrap();
        goodbyes += parsed.answers.iter().filter(|r| r.ttl.is_zero()).count();
    }
    assert_eq!(goodbyes, 2);

    let _ = engine.step(now);
    assert!(drain_outbound(&mut engine).is_empty());
}

#[test]
fn duplicate_local_record_is_rejected() {
    let (mut engine, _clock) = common::test_engine();
    let record = a("myhost.local", [10, 0, 0, 42]);
    engine.publish(record.clone(), |_, _| {}).unwrap();
    assert!(matches!(engine.publish(record, |_, _| {}), Err(EngineError::DuplicateRecord)));
}

#[test]
fn withdraw_unknown_token_is_an_error() {
    let (mut engine, _clock) = common::test_engine();
    let token = engine.query(Name::parse("myhost.local").unwrap(), Type::A, |_| QueryControl::Continue);
    engine.cancel_query(token).unwrap();
    assert!(matches!(engine.cancel_query(token), Err(EngineError::UnknownQuery(_))));
}
