// Query tracker invariants from spec.md section 8. `Token` is an
// opaque handle minted only by `Engine`, so the tracker is exercised
// through the engine's public `query`/`receive` API rather than
// constructed directly.

mod common;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use mdnsd::wire::{Class, Message, Name, Question, Record, Resource, Type};
use mdnsd::QueryControl;

fn ptr(owner: &str, target: &str, flush: bool) -> Record {
    Record {
        name: Name::parse(owner).unwrap(),
        class: Class::Internet,
        cache_flush: flush,
        ttl: Duration::from_secs(4500),
        resource: Resource::PTR(Name::parse(target).unwrap()),
    }
}

/// spec.md section 8: retransmits back off exponentially (1s doubling,
/// capped at 3600s), so over any stretch of wall-clock time the send
/// count grows logarithmically, not linearly -- and at least once
/// immediately, satisfying "1 <= n" for any T >= 0.
#[test]
fn retransmit_count_grows_logarithmically_with_elapsed_time() {
    let (mut engine, _clock) = common::test_engine();
    let t0 = Instant::now();
    engine.query(Name::parse("myhost.local").unwrap(), Type::A, |_| QueryControl::Continue);

    let mut now = t0;
    let mut n: u32 = 0;
    let mut intervals = Vec::new();
    let mut last_send: Option<Instant> = None;

    for _ in 0..10 {
        let round_start = now;
        now = engine.step(now);
        let mut sent = false;
        while engine.next_outbound().is_some() {
            n += 1;
            sent = true;
        }
        if sent {
            if let Some(prev) = last_send {
                intervals.push(round_start.duration_since(prev));
            }
            last_send = Some(round_start);
        }
    }

    assert!(n >= 1, "the initial query must go out at least once");
    // Each retransmit interval at least doubles the previous one, up
    // to the 1hr cap (exponential back-off, spec.md section 4.3).
    for pair in intervals.windows(2) {
        assert!(
            pair[1] >= pair[0] || pair[0] >= Duration::from_secs(3600),
            "interval {:?} did not grow from {:?}",
            pair[1],
            pair[0]
        );
    }
    // After 10 doublings starting at 1s, far fewer than 10 seconds of
    // linear polling would have produced the same number of sends.
    assert!(n <= 10);
}

#[test]
fn query_with_complete_known_answer_set_gets_no_response() {
    let (mut engine, _clock) = common::test_engine();
    let record = ptr("_http._tcp.local", "server._http._tcp.local", false);
    engine.publish(record.clone(), |_, _| {}).unwrap();

    // Shared records announce immediately; two steps reach Steady.
    let mut now = Instant::now();
    now = engine.step(now);
    let _ = engine.step(now);
    while engine.next_outbound().is_some() {}

    // A legacy-port query carrying the record as a known answer.
    let mut m = Message::query(0x1);
    m.questions.push(Question::new(record.name.clone(), Type::PTR));
    m.answers.push(record);
    let (bytes, _) = m.serialize();

    engine.receive(&bytes, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 9999));
    assert!(engine.next_outbound().is_none());
}

#[test]
fn query_without_known_answers_gets_an_immediate_response() {
    let (mut engine, _clock) = common::test_engine();
    let record = ptr("_http._tcp.local", "server._http._tcp.local", false);
    engine.publish(record.clone(), |_, _| {}).unwrap();

    let mut now = Instant::now();
    now = engine.step(now);
    let _ = engine.step(now);
    while engine.next_outbound().is_some() {}

    let mut m = Message::query(0x2);
    m.questions.push(Question::new(record.name.clone(), Type::PTR));
    let (bytes, _) = m.serialize();

    engine.receive(&bytes, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 9999));
    let out = engine.next_outbound().expect("expected an immediate response");
    let parsed = Message::parse(&out.bytes).unwrap();
    assert_eq!(parsed.answers.len(), 1);
    assert_eq!(parsed.answers[0].resource, record.resource);
}
