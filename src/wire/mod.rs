//! DNS wire format codec: message parsing/serialization, name
//! compression, and resource record encoding.
//!
//! Grounded on `rustdns::dns`, `rustdns::io`, `rustdns::resource` and
//! `rustdns::types`, restricted and extended per spec.md section 4.1.

mod display;
pub mod header;
pub mod message;
pub mod name;
pub mod rr;

pub use header::{Class, Flags, Opcode, Rcode, Type, MAX_PACKET_LEN, MDNS_PORT, MULTICAST_GROUP, QR};
pub use message::{Message, Question, SerializeReport};
pub use name::Name;
pub use rr::{Record, Resource, SrvData, TxtData};

pub use crate::errors::ParseError;
