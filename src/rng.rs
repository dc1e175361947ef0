//! Injectable jitter source.
//!
//! RFC 6762 sprinkles randomised delays throughout: the 0-250ms initial
//! probe jitter (section 8.1), the 20-120ms response aggregation delay
//! (section 6), and the random id the teacher crate already generates
//! with `rand::thread_rng()` (`rustdns::dns::Message::random_id`). This
//! module generalises that one call site into a trait so tests can
//! supply a deterministic sequence instead.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::time::Duration;

/// A source of jitter, expressed as "pick a duration in this range".
pub trait Jitter {
    fn jitter_ms(&self, low: u64, high: u64) -> Duration;

    /// A random 16-bit value, used for message IDs on unicast queries.
    fn random_u16(&self) -> u16;
}

/// The jitter source used outside of tests, backed by `rand`'s
/// non-cryptographic PRNG, seeded per engine (spec.md section 9).
pub struct SystemJitter {
    rng: RefCell<StdRng>,
}

impl SystemJitter {
    pub fn new() -> Self {
        SystemJitter {
            rng: RefCell::new(StdRng::from_entropy()),
        }
    }
}

impl Default for SystemJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Jitter for SystemJitter {
    fn jitter_ms(&self, low: u64, high: u64) -> Duration {
        if low >= high {
            return Duration::from_millis(low);
        }
        Duration::from_millis(self.rng.borrow_mut().gen_range(low..high))
    }

    fn random_u16(&self) -> u16 {
        self.rng.borrow_mut().gen()
    }
}

/// A jitter source that always returns the low end of the range, for
/// tests that want exact, reproducible timing.
pub struct FixedJitter;

impl Jitter for FixedJitter {
    fn jitter_ms(&self, low: u64, _high: u64) -> Duration {
        Duration::from_millis(low)
    }

    fn random_u16(&self) -> u16 {
        0
    }
}
