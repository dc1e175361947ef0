//! Query tracker: outstanding outbound queries, their callbacks, and
//! retransmit scheduling with exponential back-off (spec.md section
//! 4.3).
//!
//! Grounded on `mdnsd_query(engine, name, type, timeout, callback,
//! data)` in `original_source/src/mdnsd.c`, which keeps exactly this
//! shape: a name/type pair, a user callback, and a retry schedule
//! driven from the daemon's own `mdnsd_step`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::engine::Token;
use crate::store::RecordStore;
use crate::wire::{Name, Record, Type};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(3600);
const INITIAL_JITTER_MS: (u64, u64) = (0, 250);

/// What a callback asks the tracker to do with the query after it runs.
pub enum QueryControl {
    Continue,
    Cancel,
}

/// An outstanding question, with a fingerprint set of every rdata
/// already reported to the caller so repeat answers don't re-fire the
/// callback (spec.md section 8, scenario 3).
pub struct Query {
    pub name: Name,
    pub qtype: Type,
    pub next_send: Instant,
    backoff: Duration,
    reported: HashSet<Vec<u8>>,
    callback: Box<dyn FnMut(&Record) -> QueryControl>,
}

#[derive(Default)]
pub struct QueryTracker {
    queries: HashMap<Token, Query>,
}

impl QueryTracker {
    pub fn new() -> QueryTracker {
        QueryTracker::default()
    }

    /// Registers a new query. The first transmit happens on the next
    /// `due()` call after `now + jitter(0, 250ms)`, per RFC 6762
    /// section 8.1's initial-probe-style jitter applied to the first
    /// query send.
    pub fn register(
        &mut self,
        token: Token,
        name: Name,
        qtype: Type,
        now: Instant,
        jitter: &dyn crate::rng::Jitter,
        callback: Box<dyn FnMut(&Record) -> QueryControl>,
    ) {
        let delay = jitter.jitter_ms(INITIAL_JITTER_MS.0, INITIAL_JITTER_MS.1);
        self.queries.insert(
            token,
            Query {
                name,
                qtype,
                next_send: now + delay,
                backoff: INITIAL_BACKOFF,
                reported: HashSet::new(),
                callback,
            },
        );
    }

    pub fn cancel(&mut self, token: Token) -> Option<Query> {
        self.queries.remove(&token)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.queries.contains_key(&token)
    }

    /// Tokens of every query due to (re)transmit at or before `now`.
    /// Also advances each one's `next_send`/back-off as a side effect,
    /// matching the "first send immediate, then double up to 3600s"
    /// schedule from spec.md section 4.3.
    pub fn due(&mut self, now: Instant) -> Vec<Token> {
        let mut due = Vec::new();

        for (&token, query) in self.queries.iter_mut() {
            if query.next_send <= now {
                due.push(token);
                query.next_send = now + query.backoff;
                query.backoff = (query.backoff * 2).min(MAX_BACKOFF);
            }
        }

        due
    }

    pub fn get(&self, token: Token) -> Option<&Query> {
        self.queries.get(&token)
    }

    /// The known-answer set for a query: every cached record matching
    /// (name, type) whose remaining TTL is still more than half its
    /// original TTL (spec.md section 4.3).
    pub fn known_answers(&self, token: Token, store: &RecordStore, now: Instant) -> Vec<Record> {
        let Some(query) = self.queries.get(&token) else {
            return Vec::new();
        };

        store
            .cached_matching(&query.name, query.qtype)
            .into_iter()
            .filter(|r| r.is_known_answer(now))
            .map(|r| r.record.clone())
            .collect()
    }

    /// Notifies every query matching `record`'s (name, type) of a
    /// newly-arrived record, firing callbacks for rdata not already
    /// reported. Queries whose callback asks to cancel are removed.
    pub fn notify(&mut self, record: &Record) {
        let mut cancelled = Vec::new();

        for (&token, query) in self.queries.iter_mut() {
            if query.name != record.name || !query.qtype.matches(record.r#type()) {
                continue;
            }

            let fingerprint = record.rdata_bytes();
            if query.reported.contains(&fingerprint) {
                continue;
            }
            query.reported.insert(fingerprint);

            if let QueryControl::Cancel = (query.callback)(record) {
                cancelled.push(token);
            }
        }

        for token in cancelled {
            self.queries.remove(&token);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queries.values().map(|q| q.next_send).min()
    }

    /// Forces an immediate retransmit of every query matching (name,
    /// type), used when the record store signals a cache entry is
    /// approaching expiry and still has an interested query watching
    /// it (spec.md section 4.2/4.3).
    pub fn force_due(&mut self, name: &Name, qtype: Type, now: Instant) {
        for query in self.queries.values_mut() {
            if query.name == *name && query.qtype.matches(qtype) {
                query.next_send = now;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
