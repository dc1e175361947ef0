//! DNS message parsing and serialization.
//!
//! The header bit-packing (`read`/`write` of the two flag bytes) is
//! lifted directly from `rustdns::dns::MessageParser::parse` and
//! `Message::to_vec`. Everything downstream of the header -- full
//! section encoding with name compression and `MAX_PACKET_LEN`
//! truncation -- is new: the teacher's encoder asserts the answer/
//! authority/additional sections are empty and never implements them.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use num_traits::FromPrimitive;
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

use crate::errors::ParseError;
use crate::wire::header::{
    Class, Flags, Opcode, Rcode, Type, CLASS_FLAG_BIT, CLASS_MASK, MAX_PACKET_LEN, QR,
};
use crate::wire::name::Name;
use crate::wire::rr::{Record, Resource};

/// A question, with the mDNS "QU" bit (RFC 6762 section 5.4) riding on
/// the top bit of the class field.
#[derive(Clone, Debug, PartialEq)]
pub struct Question {
    pub name: Name,
    pub qtype: Type,
    pub qclass: Class,
    /// Requests a unicast response instead of the usual multicast one.
    pub qu: bool,
}

impl Question {
    pub fn new(name: Name, qtype: Type) -> Question {
        Question {
            name,
            qtype,
            qclass: Class::Internet,
            qu: false,
        }
    }
}

/// An in-memory parsed (or about-to-be-serialized) DNS message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub id: u16,
    pub flags: Flags,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

/// How much of a `Message` actually made it into the serialized bytes,
/// so the caller can schedule the remainder on the next tick (spec.md
/// section 4.1, section 3 invariant 4).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SerializeReport {
    pub answers_written: usize,
    pub authorities_written: usize,
    pub additionals_written: usize,
    pub truncated: bool,
}

impl Message {
    /// A query message: QR=0, per RFC 6762 section 18.2.
    pub fn query(id: u16) -> Message {
        Message {
            id,
            flags: Flags::query(),
            ..Default::default()
        }
    }

    /// A response message: QR=1, AA=1, per RFC 6762 section 18.4.
    pub fn response(id: u16) -> Message {
        Message {
            id,
            flags: Flags::response(),
            ..Default::default()
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Message, ParseError> {
        MessageParser::new(buf).parse()
    }

    /// Serializes this message, compressing names and truncating (with
    /// the TC bit set) if it would exceed [`MAX_PACKET_LEN`].
    pub fn serialize(&self) -> (Vec<u8>, SerializeReport) {
        let mut buf = Vec::with_capacity(512);
        let mut dict: HashMap<Vec<u8>, u16> = HashMap::new();
        let mut report = SerializeReport::default();

        // Header is fixed size; reserve it and patch counts at the end.
        buf.extend_from_slice(&[0u8; 12]);

        for q in &self.questions {
            q.name.write(&mut buf, &mut dict);
            buf.write_u16::<BE>(q.qtype as u16).unwrap();
            let mut qclass = q.qclass as u16;
            if q.qu {
                qclass |= CLASS_FLAG_BIT;
            }
            buf.write_u16::<BE>(qclass).unwrap();
        }

        write_section(&self.answers, &mut buf, &mut dict, &mut report.answers_written, &mut report.truncated);
        if !report.truncated {
            write_section(&self.authorities, &mut buf, &mut dict, &mut report.authorities_written, &mut report.truncated);
        }
        if !report.truncated {
            write_section(&self.additionals, &mut buf, &mut dict, &mut report.additionals_written, &mut report.truncated);
        }

        write_header(
            &mut buf,
            self.id,
            self.flags,
            report.truncated || self.flags.tc,
            self.questions.len() as u16,
            report.answers_written as u16,
            report.authorities_written as u16,
            report.additionals_written as u16,
        );

        (buf, report)
    }
}

fn write_section(
    records: &[Record],
    buf: &mut Vec<u8>,
    dict: &mut HashMap<Vec<u8>, u16>,
    written: &mut usize,
    truncated: &mut bool,
) {
    for record in records {
        let checkpoint = buf.len();
        let dict_checkpoint = dict.clone();

        record.name.write(buf, dict);
        buf.write_u16::<BE>(record.r#type() as u16).unwrap();
        let mut class = record.class as u16;
        if record.cache_flush {
            class |= CLASS_FLAG_BIT;
        }
        buf.write_u16::<BE>(class).unwrap();
        buf.write_u32::<BE>(record.ttl.as_secs() as u32).unwrap();
        record.resource.write(buf, dict);

        if buf.len() > MAX_PACKET_LEN {
            // Roll back this record; it (and everything after it in
            // this section) is deferred to the caller for a later tick.
            buf.truncate(checkpoint);
            *dict = dict_checkpoint;
            *truncated = true;
            return;
        }

        *written += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn write_header(
    buf: &mut Vec<u8>,
    id: u16,
    flags: Flags,
    tc: bool,
    qd_count: u16,
    an_count: u16,
    ns_count: u16,
    ar_count: u16,
) {
    buf[0] = (id >> 8) as u8;
    buf[1] = (id & 0xff) as u8;

    let mut b = 0u8;
    b |= if flags.qr.to_bool() { 0b1000_0000 } else { 0 };
    b |= ((flags.opcode as u8) << 3) & 0b0111_1000;
    b |= if flags.aa { 0b0000_0100 } else { 0 };
    b |= if tc { 0b0000_0010 } else { 0 };
    b |= if flags.rd { 0b0000_0001 } else { 0 };
    buf[2] = b;

    let mut b = 0u8;
    b |= if flags.ra { 0b1000_0000 } else { 0 };
    b |= (flags.rcode as u8) & 0b0000_1111;
    buf[3] = b;

    buf[4..6].copy_from_slice(&qd_count.to_be_bytes());
    buf[6..8].copy_from_slice(&an_count.to_be_bytes());
    buf[8..10].copy_from_slice(&ns_count.to_be_bytes());
    buf[10..12].copy_from_slice(&ar_count.to_be_bytes());
}

#[derive(Copy, Clone, PartialEq)]
enum Section {
    Answers,
    Authorities,
    Additionals,
}

struct MessageParser<'a> {
    cur: Cursor<&'a [u8]>,
    buf: &'a [u8],
    m: Message,
}

impl<'a> MessageParser<'a> {
    fn new(buf: &'a [u8]) -> MessageParser<'a> {
        MessageParser {
            cur: Cursor::new(buf),
            buf,
            m: Message::default(),
        }
    }

    fn parse(mut self) -> Result<Message, ParseError> {
        self.m.id = self.read_u16()?;

        let b = self.read_u8()?;
        self.m.flags.qr = QR::from_bool(0b1000_0000 & b != 0);
        let opcode = (0b0111_1000 & b) >> 3;
        self.m.flags.aa = (0b0000_0100 & b) != 0;
        self.m.flags.tc = (0b0000_0010 & b) != 0;
        self.m.flags.rd = (0b0000_0001 & b) != 0;
        self.m.flags.opcode =
            Opcode::from_u8(opcode).ok_or(ParseError::UnsupportedOpcode(opcode))?;

        let b = self.read_u8()?;
        self.m.flags.ra = (0b1000_0000 & b) != 0;
        let rcode = 0b0000_1111 & b;
        self.m.flags.rcode = Rcode::from_u8(rcode).unwrap_or(Rcode::FormErr);

        let qd_count = self.read_u16()?;
        let an_count = self.read_u16()?;
        let ns_count = self.read_u16()?;
        let ar_count = self.read_u16()?;

        self.read_questions(qd_count)?;
        self.read_records(an_count, Section::Answers)?;
        self.read_records(ns_count, Section::Authorities)?;
        self.read_records(ar_count, Section::Additionals)?;

        Ok(self.m)
    }

    fn read_u8(&mut self) -> Result<u8, ParseError> {
        self.cur.read_u8().map_err(|_| ParseError::Truncated("header"))
    }

    fn read_u16(&mut self) -> Result<u16, ParseError> {
        self.cur
            .read_u16::<BE>()
            .map_err(|_| ParseError::Truncated("header"))
    }

    fn read_u32(&mut self) -> Result<u32, ParseError> {
        self.cur
            .read_u32::<BE>()
            .map_err(|_| ParseError::Truncated("record"))
    }

    fn read_questions(&mut self, count: u16) -> Result<(), ParseError> {
        self.m.questions.reserve_exact(count.into());

        for _ in 0..count {
            let name = Name::read(&mut self.cur)?;
            let raw_type = self.read_u16()?;
            let qtype = Type::from_u16(raw_type).ok_or(ParseError::UnknownType(raw_type))?;

            let raw_class = self.read_u16()?;
            let qu = raw_class & CLASS_FLAG_BIT != 0;
            let qclass = Class::from_u16(raw_class & CLASS_MASK)
                .ok_or(ParseError::UnknownClass(raw_class & CLASS_MASK))?;

            self.m.questions.push(Question {
                name,
                qtype,
                qclass,
                qu,
            });
        }

        Ok(())
    }

    fn read_records(&mut self, count: u16, section: Section) -> Result<(), ParseError> {
        for _ in 0..count {
            let name = Name::read(&mut self.cur)?;
            let raw_type = self.read_u16()?;
            let r#type = Type::from_u16(raw_type).ok_or(ParseError::UnknownType(raw_type))?;

            let raw_class = self.read_u16()?;
            let cache_flush = raw_class & CLASS_FLAG_BIT != 0;
            let class = Class::from_u16(raw_class & CLASS_MASK)
                .ok_or(ParseError::UnknownClass(raw_class & CLASS_MASK))?;

            let ttl = self.read_u32()?;
            let rdlength = self.read_u16()? as usize;

            let start = self.cur.position() as usize;
            let resource = Resource::parse(r#type, self.buf, start, rdlength)?;

            self.cur
                .set_position((start + rdlength) as u64);

            let record = Record {
                name,
                class,
                cache_flush,
                ttl: Duration::from_secs(ttl as u64),
                resource,
            };

            match section {
                Section::Answers => self.m.answers.push(record),
                Section::Authorities => self.m.authorities.push(record),
                Section::Additionals => self.m.additionals.push(record),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::rr::SrvData;
    use std::net::Ipv4Addr;

    #[test]
    fn test_round_trip_query() {
        let mut m = Message::query(0x1234);
        m.questions.push(Question::new(Name::parse("myhost.local").unwrap(), Type::A));

        let (bytes, report) = m.serialize();
        assert!(!report.truncated);

        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(parsed.id, 0x1234);
        assert_eq!(parsed.flags.qr, QR::Query);
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.questions[0].name.to_string(), "myhost.local.");
        assert_eq!(parsed.questions[0].qtype, Type::A);
    }

    #[test]
    fn test_round_trip_response_with_answer() {
        let mut m = Message::response(0);
        m.answers.push(Record {
            name: Name::parse("myhost.local").unwrap(),
            class: Class::Internet,
            cache_flush: true,
            ttl: Duration::from_secs(120),
            resource: Resource::A(Ipv4Addr::new(10, 0, 0, 42)),
        });

        let (bytes, report) = m.serialize();
        assert_eq!(report.answers_written, 1);

        let parsed = Message::parse(&bytes).unwrap();
        assert!(parsed.flags.aa);
        assert_eq!(parsed.answers.len(), 1);
        assert!(parsed.answers[0].cache_flush);
        assert_eq!(parsed.answers[0].resource, Resource::A(Ipv4Addr::new(10, 0, 0, 42)));
    }

    #[test]
    fn test_srv_round_trip() {
        let mut m = Message::response(0);
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

        let (bytes, _) = m.serialize();
        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(parsed.answers[0].resource, m.answers[0].resource);
    }

    #[test]
    fn test_truncation_sets_tc_and_reports_partial_count() {
        let mut m = Message::response(0);
        for i in 0..400 {
            m.answers.push(Record {
                name: Name::parse(&format!("host{}.local", i)).unwrap(),
                class: Class::Internet,
                cache_flush: true,
                ttl: Duration::from_secs(120),
                resource: Resource::A(Ipv4Addr::new(10, 0, 0, i as u8)),
            });
        }

        let (bytes, report) = m.serialize();
        assert!(report.truncated);
        assert!(report.answers_written < 400);
        assert!(bytes.len() <= MAX_PACKET_LEN);

        let parsed = Message::parse(&bytes).unwrap();
        assert!(parsed.flags.tc);
        assert_eq!(parsed.answers.len(), report.answers_written);
    }
}
