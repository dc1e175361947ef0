//! Resource record types and their rdata encoding, modeled on
//! `rustdns::resource`/`rustdns::types::Resource` but restricted to the
//! RR set spec.md section 3 names: A, NS, CNAME, PTR, TXT, SRV.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::errors::ParseError;
use crate::wire::header::{Class, Type};
use crate::wire::name::Name;

/// An opaque TXT payload, stored as `<len><bytes>` segments exactly as
/// it appears on the wire (spec.md section 3). The source need not be
/// UTF-8 (DNS-SD TXT records are typically `key=value` pairs but the
/// format itself is just length-prefixed bytes, unlike the teacher's
/// `Record::TXT(Vec<String>)` which assumes UTF-8 strings).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TxtData {
    segments: Vec<Vec<u8>>,
}

pub const MAX_TXT_LEN: usize = 8900;

impl TxtData {
    pub fn empty() -> TxtData {
        TxtData::default()
    }

    pub fn from_segments(segments: Vec<Vec<u8>>) -> Result<TxtData, ParseError> {
        let total: usize = segments.iter().map(|s| s.len() + 1).sum();
        if total > MAX_TXT_LEN {
            return Err(ParseError::Malformed("TXT record exceeds 8900 octets"));
        }
        for s in &segments {
            if s.len() > 255 {
                return Err(ParseError::Malformed("TXT segment longer than 255 octets"));
            }
        }
        Ok(TxtData { segments })
    }

    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    fn parse(buf: &[u8]) -> Result<TxtData, ParseError> {
        let mut segments = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            let len = buf[offset] as usize;
            offset += 1;

            let seg = buf
                .get(offset..offset + len)
                .ok_or(ParseError::Malformed("TXT segment shorter than its length byte"))?;
            segments.push(seg.to_vec());
            offset += len;
        }

        TxtData::from_segments(segments)
    }

    fn write(&self, buf: &mut Vec<u8>) {
        for seg in &self.segments {
            buf.push(seg.len() as u8);
            buf.extend_from_slice(seg);
        }
    }
}

impl fmt::Display for TxtData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        write!(f, "\"{}\"", parts.join(" "))
    }
}

/// SRV rdata (RFC 2782), grounded on `rustdns::resource::Srv`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrvData {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: Name,
}

impl fmt::Display for SrvData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.priority, self.weight, self.port, self.target
        )
    }
}

/// Record type-specific payload. Mirrors `rustdns::types::Resource`
/// with the RR set this engine actually supports.
#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Resource {
    A(Ipv4Addr),
    NS(Name),
    CNAME(Name),
    PTR(Name),
    TXT(TxtData),
    SRV(SrvData),
}

impl Resource {
    pub fn r#type(&self) -> Type {
        match self {
            Resource::A(_) => Type::A,
            Resource::NS(_) => Type::NS,
            Resource::CNAME(_) => Type::CNAME,
            Resource::PTR(_) => Type::PTR,
            Resource::TXT(_) => Type::TXT,
            Resource::SRV(_) => Type::SRV,
        }
    }

    /// Records that must probe for uniqueness before being announced
    /// (spec.md section 3): A, SRV, and most TXT. PTR records (e.g.
    /// `_http._tcp.local`) are shared and skip probing.
    pub fn is_unique_by_default(&self) -> bool {
        !matches!(self, Resource::PTR(_))
    }

    pub(crate) fn parse(
        r#type: Type,
        buf: &[u8],
        start: usize,
        len: usize,
    ) -> Result<Resource, ParseError> {
        let rdata = buf
            .get(start..start + len)
            .ok_or(ParseError::ShortRdata { want: len, got: buf.len().saturating_sub(start) })?;

        match r#type {
            Type::A => {
                if rdata.len() != 4 {
                    return Err(ParseError::Malformed("A record must be 4 octets"));
                }
                Ok(Resource::A(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3])))
            }
            Type::NS => Ok(Resource::NS(parse_name_rdata(buf, start, len)?)),
            Type::CNAME => Ok(Resource::CNAME(parse_name_rdata(buf, start, len)?)),
            Type::PTR => Ok(Resource::PTR(parse_name_rdata(buf, start, len)?)),
            Type::TXT => Ok(Resource::TXT(TxtData::parse(rdata)?)),
            Type::SRV => Ok(Resource::SRV(parse_srv(buf, start, len)?)),
            Type::ANY => Err(ParseError::Malformed("ANY is not a valid record type")),
        }
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>, dict: &mut HashMap<Vec<u8>, u16>) {
        // Reserve the rdlength slot, write the rdata, then patch the
        // length back in -- the same two-pass approach is needed
        // because names inside rdata (NS/CNAME/PTR/SRV target) may
        // compress to a different length than their uncompressed form.
        let len_pos = buf.len();
        buf.extend_from_slice(&[0, 0]);
        let start = buf.len();

        match self {
            Resource::A(ip) => buf.extend_from_slice(&ip.octets()),
            Resource::NS(name) | Resource::CNAME(name) | Resource::PTR(name) => {
                name.write(buf, dict)
            }
            Resource::TXT(txt) => txt.write(buf),
            Resource::SRV(srv) => {
                buf.write_u16::<BE>(srv.priority).unwrap();
                buf.write_u16::<BE>(srv.weight).unwrap();
                buf.write_u16::<BE>(srv.port).unwrap();
                srv.target.write(buf, dict);
            }
        }

        let rdlen = (buf.len() - start) as u16;
        buf[len_pos] = (rdlen >> 8) as u8;
        buf[len_pos + 1] = (rdlen & 0xff) as u8;
    }
}

fn parse_name_rdata(buf: &[u8], start: usize, len: usize) -> Result<Name, ParseError> {
    let mut cur = Cursor::new(buf);
    cur.set_position(start as u64);
    let name = Name::read(&mut cur)?;

    // A name inside rdata may itself use compression, so its encoded
    // length need not equal `len` when it points elsewhere; only
    // reject if it read past the declared rdlength without using a
    // pointer to do so.
    let consumed = cur.position() as usize - start;
    if consumed > len && !name_used_pointer(buf, start, consumed) {
        return Err(ParseError::Malformed("name rdata overran rdlength"));
    }

    Ok(name)
}

fn name_used_pointer(buf: &[u8], start: usize, consumed: usize) -> bool {
    buf.get(start..start + consumed)
        .map(|slice| slice.iter().any(|&b| b & 0xc0 == 0xc0))
        .unwrap_or(false)
}

fn parse_srv(buf: &[u8], start: usize, len: usize) -> Result<SrvData, ParseError> {
    if len < 7 {
        return Err(ParseError::Malformed("SRV record shorter than 7 octets"));
    }

    let mut cur = Cursor::new(buf);
    cur.set_position(start as u64);

    let priority = cur.read_u16::<BE>().map_err(|_| ParseError::Truncated("SRV"))?;
    let weight = cur.read_u16::<BE>().map_err(|_| ParseError::Truncated("SRV"))?;
    let port = cur.read_u16::<BE>().map_err(|_| ParseError::Truncated("SRV"))?;
    let target = Name::read(&mut cur)?;

    Ok(SrvData {
        priority,
        weight,
        port,
        target,
    })
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resource::A(ip) => ip.fmt(f),
            Resource::NS(n) => n.fmt(f),
            Resource::CNAME(n) => n.fmt(f),
            Resource::PTR(n) => n.fmt(f),
            Resource::TXT(t) => t.fmt(f),
            Resource::SRV(s) => s.fmt(f),
        }
    }
}

/// A full resource record: owner name, class, cache-flush bit, TTL and
/// rdata. Modeled on `rustdns::types::Record`.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub name: Name,
    pub class: Class,
    pub cache_flush: bool,
    pub ttl: Duration,
    pub resource: Resource,
}

impl Record {
    pub fn r#type(&self) -> Type {
        self.resource.r#type()
    }

    /// Whether this record is `unique` per RFC 6762 section 8 and must
    /// probe before being announced.
    pub fn is_unique(&self) -> bool {
        self.resource.is_unique_by_default()
    }

    /// RFC 6762 section 8.2 tiebreak: compare rdata lexicographically
    /// (on the wire-encoded bytes) to decide who wins a simultaneous
    /// probe.
    pub fn rdata_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut dict = HashMap::new();
        self.resource.write(&mut buf, &mut dict);
        buf
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{name:<20} {ttl:>4} {class} {type:6} {resource}",
            name = self.name,
            ttl = self.ttl.as_secs(),
            class = self.class,
            r#type = self.r#type(),
            resource = self.resource,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txt_empty() {
        let txt = TxtData::parse(&[]).unwrap();
        assert!(txt.segments().is_empty());
    }

    #[test]
    fn test_txt_round_trip() {
        let txt = TxtData::from_segments(vec![b"a=1".to_vec(), b"b=2".to_vec()]).unwrap();
        let mut buf = Vec::new();
        txt.write(&mut buf);
        assert_eq!(TxtData::parse(&buf).unwrap(), txt);
    }

    #[test]
    fn test_a_round_trip() {
        let resource = Resource::A(Ipv4Addr::new(10, 0, 0, 42));
        let mut buf = Vec::new();
        let mut dict = HashMap::new();
        resource.write(&mut buf, &mut dict);

        // 2-byte rdlength + 4-byte address.
        assert_eq!(buf.len(), 6);
        let decoded = Resource::parse(Type::A, &buf, 2, 4).unwrap();
        assert_eq!(decoded, resource);
    }
}
