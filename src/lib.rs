//! A link-local mDNS (RFC 6762) / DNS-SD (RFC 6763) protocol engine.
//!
//! This crate is the protocol engine only: parsing and serializing DNS
//! wire messages, tracking local and cached resource records, driving
//! the probe/announce/goodbye lifecycle, and scheduling outbound
//! queries with back-off. Socket creation, multicast group joining,
//! and the host's I/O loop are deliberately left to the caller -- see
//! [`engine::Engine`] for the non-blocking `step` interface a host
//! drives from its own `select`-style loop, and `demos/mquery` for a
//! minimal worked example.

#[macro_use]
mod errors;

pub mod engine;
pub mod publish;
pub mod query;
pub mod rng;
pub mod store;
pub mod time;
mod util;
pub mod wire;

pub use engine::{Engine, EngineConfig, Outbound, Token};
pub use errors::{EngineError, ParseError};
pub use query::QueryControl;
pub use rng::{FixedJitter, Jitter, SystemJitter};
pub use time::{Clock, FakeClock, SystemClock};
