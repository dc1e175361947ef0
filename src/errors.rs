//! Error types for the wire codec and the engine.
//!
//! The split mirrors the teacher crate: low level parsing stays on
//! `io::Result` built with the `bail!` macro (because the codec reads
//! through a `Cursor` the same way `rustdns::dns`/`rustdns::io` do),
//! while engine/API level failures get a `thiserror`-derived enum.

use thiserror::Error;

/// Construct and return an `io::Error` with a formatted message.
///
/// Borrowed verbatim (in spirit) from the teacher crate's `bail!`.
#[macro_export]
macro_rules! bail {
    ($kind:ident, $($arg:tt)*) => {
        return Err(
            ::std::io::Error::new(::std::io::ErrorKind::$kind, format!($($arg)*))
        )
    };
}

/// Failures from parsing a wire-format mDNS message.
///
/// Per spec, none of these are ever surfaced to the host as a hard
/// error: the caller (`Engine::receive`) logs and drops the packet.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet truncated while reading {0}")]
    Truncated(&'static str),

    #[error("label longer than 63 octets")]
    LabelTooLong,

    #[error("domain name longer than 255 octets")]
    NameTooLong,

    #[error("compression pointer does not point backwards")]
    BadPointer,

    #[error("compression pointer loop (visited more than 256 labels)")]
    PointerLoop,

    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(u8),

    #[error("unknown record type {0}")]
    UnknownType(u16),

    #[error("unknown class {0}")]
    UnknownClass(u16),

    #[error("rdata shorter ({got}) than advertised rdlength ({want})")]
    ShortRdata { want: usize, got: usize },

    #[error("malformed record: {0}")]
    Malformed(&'static str),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ParseError::Truncated("message"),
            _ => ParseError::Malformed("io error while parsing"),
        }
    }
}

/// Failures surfaced by the host-facing `Engine` API.
///
/// Conflict detection and query cancellation are delivered to callers
/// via callback, not via this type (spec.md section 7): this only
/// covers the handful of calls that can be misused directly.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EngineError {
    #[error("a local record with this (name, type, rdata) is already published")]
    DuplicateRecord,

    #[error("no record is published under handle {0:?}")]
    UnknownRecord(crate::engine::Token),

    #[error("no query is registered under handle {0:?}")]
    UnknownQuery(crate::engine::Token),
}
