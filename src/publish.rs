//! Publisher: the per-record probe/announce/steady/goodbye state
//! machine and RFC 6762 section 8.2 conflict tiebreak (spec.md section
//! 4.4).
//!
//! The state table itself has no direct teacher counterpart (`rustdns`
//! is a stub resolver, not a responder) -- it is grounded on
//! `original_source/src/mdnsd.c`'s `PROBE`/`ANNOUNCE`/`STATE` constants
//! and the timers `mdnsd_step` drives off of them, reshaped here into
//! an explicit enum per RFC 6762 section 8 rather than the C source's
//! integer countdowns.

use std::time::{Duration, Instant};

use crate::engine::Token;
use crate::rng::Jitter;
use crate::wire::{Name, Record, Type};

const PROBE_WAIT: Duration = Duration::from_millis(250);
const ANNOUNCE_WAIT: Duration = Duration::from_secs(1);
const PROBE_JITTER_MS: (u64, u64) = (0, 250);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PublishState {
    Probe1,
    Probe2,
    Probe3,
    Announce1,
    Announce2,
    Steady,
    Goodbye,
}

/// What the engine should actually put on the wire for a record that
/// just became due. `SendGoodbye` is one-shot: the record is removed
/// from the publisher as part of producing this action, so the
/// engine must read the record's data (via [`Publisher::get`]) before
/// calling [`Publisher::advance`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PublishAction {
    SendProbe,
    SendAnnounce,
    SendGoodbye,
}

pub struct PublishedRecord {
    pub record: Record,
    pub unique: bool,
    pub state: PublishState,
    pub next_action: Instant,
    conflict_cb: Box<dyn FnMut(&Name, Type)>,
}

impl PublishedRecord {
    /// Only records that have reached Steady are valid answers to
    /// queries (spec.md section 3, invariant 3).
    pub fn is_answerable(&self) -> bool {
        matches!(self.state, PublishState::Steady)
    }

    pub fn is_probing(&self) -> bool {
        matches!(
            self.state,
            PublishState::Probe1 | PublishState::Probe2 | PublishState::Probe3
        )
    }
}

#[derive(Default)]
pub struct Publisher {
    records: std::collections::HashMap<Token, PublishedRecord>,
}

impl Publisher {
    pub fn new() -> Publisher {
        Publisher::default()
    }

    /// Registers a record for publication. Per the resolved open
    /// question (spec.md section 9), every unique record probes
    /// unconditionally; non-unique (shared) records skip straight to
    /// announcing.
    pub fn publish(
        &mut self,
        token: Token,
        record: Record,
        unique: bool,
        now: Instant,
        jitter: &dyn Jitter,
        conflict_cb: Box<dyn FnMut(&Name, Type)>,
    ) {
        let (state, next_action) = if unique {
            let delay = jitter.jitter_ms(PROBE_JITTER_MS.0, PROBE_JITTER_MS.1);
            (PublishState::Probe1, now + delay)
        } else {
            (PublishState::Announce1, now)
        };

        self.records.insert(
            token,
            PublishedRecord {
                record,
                unique,
                state,
                next_action,
                conflict_cb,
            },
        );
    }

    pub fn get(&self, token: Token) -> Option<&PublishedRecord> {
        self.records.get(&token)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Token, &PublishedRecord)> {
        self.records.iter()
    }

    pub fn iter_answerable(&self, name: &Name, qtype: Type) -> impl Iterator<Item = &Record> {
        self.records.values().filter_map(move |r| {
            if r.is_answerable() && r.record.name == *name && qtype.matches(r.record.r#type()) {
                Some(&r.record)
            } else {
                None
            }
        })
    }

    /// Marks a Steady record for withdrawal: it re-enters the state
    /// machine at Goodbye so the next `due()` pass sends its TTL=0
    /// packet.
    pub fn withdraw(&mut self, token: Token, now: Instant) -> bool {
        match self.records.get_mut(&token) {
            Some(r) if r.state != PublishState::Goodbye => {
                r.state = PublishState::Goodbye;
                r.next_action = now;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, token: Token) -> Option<PublishedRecord> {
        self.records.remove(&token)
    }

    /// Tokens due for their next probe/announce/goodbye send, oldest
    /// deadline first.
    pub fn due(&self, now: Instant) -> Vec<Token> {
        let mut due: Vec<Token> = self
            .records
            .iter()
            .filter(|(_, r)| r.next_action <= now)
            .map(|(&t, _)| t)
            .collect();
        due.sort_by_key(|t| self.records[t].next_action);
        due
    }

    /// Advances a due record's state machine by one step and reports
    /// what the engine should send for it.
    pub fn advance(&mut self, token: Token, now: Instant) -> Option<PublishAction> {
        if matches!(self.records.get(&token)?.state, PublishState::Goodbye) {
            self.records.remove(&token);
            return Some(PublishAction::SendGoodbye);
        }

        let record = self.records.get_mut(&token)?;
        let (action, next_state, next_action) = match record.state {
            PublishState::Probe1 => (PublishAction::SendProbe, PublishState::Probe2, now + PROBE_WAIT),
            PublishState::Probe2 => (PublishAction::SendProbe, PublishState::Probe3, now + PROBE_WAIT),
            PublishState::Probe3 => (PublishAction::SendProbe, PublishState::Announce1, now + PROBE_WAIT),
            PublishState::Announce1 => (PublishAction::SendAnnounce, PublishState::Announce2, now + ANNOUNCE_WAIT),
            PublishState::Announce2 => (PublishAction::SendAnnounce, PublishState::Steady, now),
            PublishState::Steady => return None,
            PublishState::Goodbye => unreachable!("handled above"),
        };

        record.state = next_state;
        record.next_action = next_action;
        Some(action)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.records.values().map(|r| r.next_action).min()
    }

    /// Called for every inbound record/question while the publisher
    /// has `token`'s record in a probing state. `other_rdata` is the
    /// rdata bytes observed on the wire for the same (name, type);
    /// `is_probe` distinguishes an inbound probe (tiebreak applies)
    /// from an inbound authoritative answer (always a conflict).
    ///
    /// Returns `true` if a conflict was detected; the record is
    /// removed from the publisher and the stored callback is invoked.
    pub fn check_conflict(
        &mut self,
        token: Token,
        other_rdata: &[u8],
        is_probe: bool,
    ) -> bool {
        let Some(record) = self.records.get_mut(&token) else {
            return false;
        };
        if !record.is_probing() {
            return false;
        }

        let ours = record.record.rdata_bytes();
        if ours.as_slice() == other_rdata {
            return false;
        }

        // RFC 6762 section 8.2: when both sides are probing for the
        // same (name, type), the host whose rdata sorts lexically
        // greater wins and the loser must pick a new name.
        if is_probe && ours.as_slice() > other_rdata {
            return false;
        }

        let mut record = self.records.remove(&token).unwrap();
        (record.conflict_cb)(&record.record.name, record.record.r#type());
        true
    }
}
