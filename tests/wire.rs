// Wire codec invariants from spec.md section 8: semantic round-trip
// equivalence, and the boundary behaviors around names/pointers/TXT.

use std::net::Ipv4Addr;
use std::time::Duration;

use mdnsd::wire::{Class, Message, Name, ParseError, Question, Record, Resource, SrvData, TxtData, Type};

fn a(name: &str, ip: [u8; 4]) -> Record {
    Record {
        name: Name::parse(name).unwrap(),
        class: Class::Internet,
        cache_flush: true,
        ttl: Duration::from_secs(120),
        resource: Resource::A(Ipv4Addr::from(ip)),
    }
}

#[test]
fn serialize_then_parse_preserves_message_semantics() {
    let mut m = Message::response(0x4242);
    m.answers.push(a("myhost.local", [10, 0, 0, 42]));
    m.answers.push(Record {
        name: Name::parse("server._http._tcp.local").unwrap(),
        class: Class::Internet,
        cache_flush: true,
        ttl: Duration::from_secs(120),
        resource: Resource::SRV(SrvData {
            priority: 0,
            weight: 0,
            port: 8080,
            target: Name::parse("myhost.local").unwrap(),
        }),
    });
    m.additionals.push(Record {
        name: Name::parse("server._http._tcp.local").unwrap(),
        class: Class::Internet,
        cache_flush: true,
        ttl: Duration::from_secs(4500),
        resource: Resource::TXT(TxtData::from_segments(vec![b"path=/".to_vec()]).unwrap()),
    });

    let (bytes, report) = m.serialize();
    assert!(!report.truncated);

    let parsed = Message::parse(&bytes).unwrap();
    // Not bit-identical (compression offsets depend on encoding order)
    // but semantically the same sections and record contents.
    assert_eq!(parsed.id, m.id);
    assert_eq!(parsed.answers, m.answers);
    assert_eq!(parsed.additionals, m.additionals);
}

#[test]
fn txt_with_zero_length_rdata_is_a_valid_empty_record() {
    let empty = TxtData::empty();
    assert_eq!(empty.segments().len(), 0);

    let mut m = Message::response(0);
    m.answers.push(Record {
        name: Name::parse("printer._ipp._tcp.local").unwrap(),
        class: Class::Internet,
        cache_flush: true,
        ttl: Duration::from_secs(4500),
        resource: Resource::TXT(empty),
    });

    let (bytes, report) = m.serialize();
    assert!(!report.truncated);

    let parsed = Message::parse(&bytes).unwrap();
    assert_eq!(parsed.answers[0].resource, Resource::TXT(TxtData::empty()));
}

#[test]
fn label_longer_than_63_octets_is_rejected() {
    let label = "a".repeat(64);
    let err = Name::parse(&label).unwrap_err();
    assert_eq!(err, ParseError::LabelTooLong);
}

#[test]
fn pointer_to_offset_at_or_after_current_position_is_rejected() {
    // Header (12 bytes) + one question whose name is a pointer at
    // offset 12 pointing at offset 12 (itself), which is not strictly
    // backwards and must be rejected.
    let mut bytes = vec![0u8; 12];
    bytes[4] = 0;
    bytes[5] = 1; // qdcount = 1
    let name_offset = bytes.len() as u16;
    bytes.push(0xc0 | ((name_offset >> 8) as u8));
    bytes.push((name_offset & 0xff) as u8);
    bytes.extend_from_slice(&(Type::A as u16).to_be_bytes());
    bytes.extend_from_slice(&(Class::Internet as u16).to_be_bytes());

    let err = Message::parse(&bytes).unwrap_err();
    assert_eq!(err, ParseError::BadPointer);
}

#[test]
fn qu_bit_and_cache_flush_bit_round_trip_independently_of_class() {
    let mut m = Message::query(0);
    let mut q = Question::new(Name::parse("myhost.local").unwrap(), Type::A);
    q.qu = true;
    m.questions.push(q);

    let mut flush_record = a("myhost.local", [10, 0, 0, 1]);
    flush_record.cache_flush = true;
    m.answers.push(flush_record);

    let (bytes, _) = m.serialize();
    let parsed = Message::parse(&bytes).unwrap();

    assert!(parsed.questions[0].qu);
    assert_eq!(parsed.questions[0].qclass, Class::Internet);
    assert!(parsed.answers[0].cache_flush);
    assert_eq!(parsed.answers[0].class, Class::Internet);
}
