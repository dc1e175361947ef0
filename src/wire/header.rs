//! Header flags and the small enumerations used throughout a [`Message`].
//!
//! Modeled directly on `rustdns::types`: `FromPrimitive`-derived enums
//! read with `num_traits::FromPrimitive`, `Display`/`EnumString` via
//! `strum_macros` for dig-style text.

use num_derive::FromPrimitive;
use strum_macros::{Display, EnumString};

use crate::wire::message::Message;

/// Query or Response bit. See `rustdns::types::QR`.
#[derive(Copy, Clone, Debug, EnumString, PartialEq, Eq)]
pub enum QR {
    Query = 0,
    Response = 1,
}

impl Default for QR {
    fn default() -> Self {
        QR::Query
    }
}

impl QR {
    pub fn from_bool(b: bool) -> QR {
        if b {
            QR::Response
        } else {
            QR::Query
        }
    }

    pub fn to_bool(self) -> bool {
        matches!(self, QR::Response)
    }
}

/// Kind of query. mDNS traffic is always `Query` (RFC 6762 section 18.3)
/// but the codec accepts whatever arrives and lets the engine decide
/// whether to answer it.
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)]
pub enum Opcode {
    Query = 0,
    IQuery = 1,
    Status = 2,
    Notify = 4,
    Update = 5,
}

impl Default for Opcode {
    fn default() -> Self {
        Opcode::Query
    }
}

/// Response code. mDNS always sends `NoError` (RFC 6762 section 18.11).
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)]
pub enum Rcode {
    NoError = 0,
    FormErr = 1,
    ServFail = 2,
    NXDomain = 3,
    NotImp = 4,
    Refused = 5,
}

impl Default for Rcode {
    fn default() -> Self {
        Rcode::NoError
    }
}

/// Resource record type. AAAA/MX/SOA/OPT are intentionally absent: this
/// engine is IPv4-only (spec.md section 1 non-goals) and does not speak
/// mail routing, zone transfer, or EDNS(0).
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u16)]
pub enum Type {
    A = 1,
    NS = 2,
    CNAME = 5,
    PTR = 12,
    TXT = 16,
    SRV = 33,

    /// Only valid as a question type.
    ANY = 255,
}

impl Default for Type {
    fn default() -> Self {
        Type::ANY
    }
}

impl Type {
    /// Whether a question of this type is satisfied by an answer of `other`.
    pub fn matches(self, other: Type) -> bool {
        self == Type::ANY || self == other
    }
}

/// Resource record class. Always `Internet` in this engine (spec.md
/// section 3): the enum exists so the wire format round-trips classes
/// it doesn't recognise without failing the whole message.
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq, Eq)]
#[repr(u16)]
pub enum Class {
    #[strum(serialize = "IN")]
    Internet = 1,
}

impl Default for Class {
    fn default() -> Self {
        Class::Internet
    }
}

/// A question or record's class field on the wire, with the top bit
/// repurposed by mDNS as the QU bit (question) or cache-flush bit
/// (response). See RFC 6762 sections 5.4 and 10.2.
pub const CLASS_FLAG_BIT: u16 = 0x8000;
pub const CLASS_MASK: u16 = 0x7fff;

/// The multicast group and port this protocol operates on (RFC 6762
/// section 3).
pub const MULTICAST_GROUP: std::net::Ipv4Addr = std::net::Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

/// Maximum size of any single outbound message (spec.md section 3,
/// invariant 4).
pub const MAX_PACKET_LEN: usize = 4000;

/// Maximum size the parser will accept for an inbound packet.
pub const MAX_INBOUND_LEN: usize = 9000;

/// Header flags, factored out of [`Message`] purely so `dns.rs`-style
/// bit-packing code has somewhere small to live.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub qr: QR,
    pub opcode: Opcode,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub rcode: Rcode,
}

impl Flags {
    /// Flags for an mDNS query, per RFC 6762 section 18: QR=0, all
    /// other bits zero.
    pub fn query() -> Flags {
        Flags {
            qr: QR::Query,
            ..Default::default()
        }
    }

    /// Flags for an mDNS response: QR=1, AA=1, per RFC 6762 section 18.4.
    pub fn response() -> Flags {
        Flags {
            qr: QR::Response,
            aa: true,
            ..Default::default()
        }
    }
}

pub(crate) fn is_response(m: &Message) -> bool {
    m.flags.qr == QR::Response
}
